//! Name, tag and instance-type derivation rules.
//!
//! Base image names follow the convention
//! `<ENVIRONMENT>-<COMPONENT>-...-<DATE>`; the successor image keeps
//! everything up to and including the last `-` and replaces the final
//! segment with the upgrade's start timestamp.

use chrono::{DateTime, Utc};

use crate::error::UpgradeError;

/// Timestamp layout used as the final name segment, sortable per run.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

const COMPONENTS: &[&str] = &["INT", "PORTAL"];
const ENVIRONMENTS: &[&str] = &["PRE", "PRO"];

/// Maps a provider-reported virtualization type to the instance size used
/// for the temporary upgrade instance. Unmapped types are an error, never
/// a silent default.
pub fn instance_type_for(virtualization_type: &str) -> Result<&'static str, UpgradeError> {
    match virtualization_type {
        "paravirtual" => Ok("t1.micro"),
        "hvm" => Ok("t2.nano"),
        other => Err(UpgradeError::Discovery(format!(
            "unmapped virtualization type '{}'",
            other
        ))),
    }
}

/// Derives the successor image's name from the base image name and the
/// iteration start time.
///
/// A name without any `-` keeps the whole name and appends the timestamp
/// directly.
pub fn image_name(base_name: &str, started_at: DateTime<Utc>) -> String {
    let prefix = match base_name.rfind('-') {
        Some(idx) => &base_name[..=idx],
        None => base_name,
    };
    format!("{}{}", prefix, started_at.format(TIMESTAMP_FORMAT))
}

/// Tag values derived from the base image name, applied to the successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub component: Option<&'static str>,
    pub environment: Option<&'static str>,
}

impl TagSet {
    /// Derive component and environment by case-sensitive substring match,
    /// first match wins per category.
    pub fn from_image_name(name: &str) -> Self {
        Self {
            component: COMPONENTS.iter().find(|c| name.contains(**c)).copied(),
            environment: ENVIRONMENTS.iter().find(|e| name.contains(**e)).copied(),
        }
    }

    /// Tags for the new, upgradeable image.
    pub fn upgradeable_tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![("Upgrade".to_string(), "YES".to_string())];
        if let Some(component) = self.component {
            tags.push(("Component".to_string(), component.to_string()));
        }
        if let Some(environment) = self.environment {
            tags.push(("Environment".to_string(), environment.to_string()));
        }
        tags
    }
}

/// Tags that retire the base image from future discovery.
pub fn retired_tags() -> Vec<(String, String)> {
    vec![("Upgrade".to_string(), "NO".to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 23, 14, 30, 5).unwrap()
    }

    #[test]
    fn test_image_name_keeps_prefix_through_last_dash() {
        assert_eq!(
            image_name("PRO-INT-web-1", ts()),
            "PRO-INT-web-20260823T143005"
        );
    }

    #[test]
    fn test_image_name_without_dash_appends_timestamp_to_whole_name() {
        // Boundary case: no '-' means the whole name is the prefix.
        assert_eq!(image_name("web", ts()), "web20260823T143005");
    }

    #[test]
    fn test_image_name_trailing_dash() {
        assert_eq!(image_name("web-", ts()), "web-20260823T143005");
    }

    #[test]
    fn test_image_name_empty_name() {
        assert_eq!(image_name("", ts()), "20260823T143005");
    }

    #[test]
    fn test_distinct_timestamps_produce_distinct_names() {
        // Re-running against the same base image never resumes; it mints a
        // second, differently-timestamped image.
        let later = Utc.with_ymd_and_hms(2026, 8, 23, 14, 30, 6).unwrap();
        assert_ne!(image_name("PRO-INT-web-1", ts()), image_name("PRO-INT-web-1", later));
    }

    #[test]
    fn test_instance_type_mapping() {
        assert_eq!(instance_type_for("paravirtual").unwrap(), "t1.micro");
        assert_eq!(instance_type_for("hvm").unwrap(), "t2.nano");
    }

    #[test]
    fn test_instance_type_unmapped_is_error() {
        let err = instance_type_for("xen").unwrap_err();
        assert!(matches!(err, UpgradeError::Discovery(_)));
        assert!(err.to_string().contains("xen"));
    }

    #[test]
    fn test_tagset_component_int_wins_over_portal() {
        let tags = TagSet::from_image_name("PRE-INT-PORTAL-api-3");
        assert_eq!(tags.component, Some("INT"));
    }

    #[test]
    fn test_tagset_component_portal() {
        let tags = TagSet::from_image_name("PRE-PORTAL-api-3");
        assert_eq!(tags.component, Some("PORTAL"));
    }

    #[test]
    fn test_tagset_environment_pre_wins_over_pro() {
        let tags = TagSet::from_image_name("PREPRO-INT-api-3");
        assert_eq!(tags.environment, Some("PRE"));
    }

    #[test]
    fn test_tagset_no_match_is_absent() {
        let tags = TagSet::from_image_name("staging-api-3");
        assert_eq!(tags.component, None);
        assert_eq!(tags.environment, None);
        assert_eq!(
            tags.upgradeable_tags(),
            vec![("Upgrade".to_string(), "YES".to_string())]
        );
    }

    #[test]
    fn test_tagset_matching_is_case_sensitive() {
        let tags = TagSet::from_image_name("pro-int-web-1");
        assert_eq!(tags.component, None);
        assert_eq!(tags.environment, None);
    }

    #[test]
    fn test_upgradeable_tags_full_set() {
        let tags = TagSet::from_image_name("PRO-INT-web-1").upgradeable_tags();
        assert_eq!(
            tags,
            vec![
                ("Upgrade".to_string(), "YES".to_string()),
                ("Component".to_string(), "INT".to_string()),
                ("Environment".to_string(), "PRO".to_string()),
            ]
        );
    }

    #[test]
    fn test_retired_tags() {
        assert_eq!(retired_tags(), vec![("Upgrade".to_string(), "NO".to_string())]);
    }
}
