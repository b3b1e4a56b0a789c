use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Tag;
use tracing::info;

use super::Ec2Client;
use crate::error::UpgradeError;

impl Ec2Client {
    pub(super) async fn apply_tags(
        &self,
        resource_id: &str,
        tags: &[(String, String)],
    ) -> Result<(), UpgradeError> {
        info!(
            resource_id = %resource_id,
            tags = ?tags,
            api_action = "CreateTags",
            "Applying resource tags"
        );

        let mut request = self.client.create_tags().resources(resource_id);
        for (key, value) in tags {
            request = request.tags(Tag::builder().key(key).value(value).build());
        }

        request.send().await.map_err(|e| {
            UpgradeError::Tagging(format!(
                "CreateTags failed for {}: {}",
                resource_id,
                DisplayErrorContext(e)
            ))
        })?;

        Ok(())
    }
}
