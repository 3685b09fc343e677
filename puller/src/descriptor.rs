//! Declarative bindings between resource types and the remote list calls
//! that serve them.

use crate::model::{ApiRequest, Params};
use puller_core::{Config, Error, Result};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// Follows `nextPageToken` until the listing is exhausted.
    Paged,
    /// A single-item get; there is no next page.
    OneShot,
}

/// A remote operation. `{name}` segments in the URL template are filled from
/// the request parameters of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiMethod {
    pub name: &'static str,
    pub url_template: &'static str,
    pub paging: Paging,
}

impl ApiMethod {
    /// Names of the path placeholders in the URL template.
    pub fn placeholders(&self) -> impl Iterator<Item = &'static str> {
        self.url_template.split('/').filter_map(|segment| {
            segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
        })
    }
}

const USERS_LIST: ApiMethod = ApiMethod {
    name: "directory.users.list",
    url_template: "https://admin.googleapis.com/admin/directory/v1/users",
    paging: Paging::Paged,
};

const ACTIVITIES_LIST: ApiMethod = ApiMethod {
    name: "reports.activities.list",
    url_template: "https://admin.googleapis.com/admin/reports/v1/activity/users/{userKey}/applications/{applicationName}",
    paging: Paging::Paged,
};

const USER_USAGE_GET: ApiMethod = ApiMethod {
    name: "reports.userUsageReport.get",
    url_template: "https://admin.googleapis.com/admin/reports/v1/usage/users/{userKey}/dates/{date}",
    paging: Paging::Paged,
};

const COURSES_LIST: ApiMethod = ApiMethod {
    name: "classroom.courses.list",
    url_template: "https://classroom.googleapis.com/v1/courses",
    paging: Paging::Paged,
};

const COURSE_WORK_LIST: ApiMethod = ApiMethod {
    name: "classroom.courses.courseWork.list",
    url_template: "https://classroom.googleapis.com/v1/courses/{courseId}/courseWork",
    paging: Paging::Paged,
};

const GMAIL_PROFILE_GET: ApiMethod = ApiMethod {
    name: "gmail.users.getProfile",
    url_template: "https://gmail.googleapis.com/gmail/v1/users/{userId}/profile",
    paging: Paging::OneShot,
};

/// The resource types this tool can pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Users,
    Meets,
    Usage,
    Courses,
    Calendar,
    CourseWork,
    UserAccounts,
    Logins,
    Chat,
    Drive,
    GmailUserProfiles,
}

/// Where a fan-out resource gets its keys from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySource {
    pub resource: ResourceKind,
    pub field: &'static str,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Users,
        ResourceKind::Meets,
        ResourceKind::Usage,
        ResourceKind::Courses,
        ResourceKind::Calendar,
        ResourceKind::CourseWork,
        ResourceKind::UserAccounts,
        ResourceKind::Logins,
        ResourceKind::Chat,
        ResourceKind::Drive,
        ResourceKind::GmailUserProfiles,
    ];

    /// Key of this resource's block under `resources` in the configuration.
    pub fn config_key(&self) -> &'static str {
        match self {
            ResourceKind::Users => "users",
            ResourceKind::Meets => "meets",
            ResourceKind::Usage => "usage",
            ResourceKind::Courses => "courses",
            ResourceKind::Calendar => "calendar",
            ResourceKind::CourseWork => "course_work",
            ResourceKind::UserAccounts => "user_accounts",
            ResourceKind::Logins => "logins",
            ResourceKind::Chat => "chat",
            ResourceKind::Drive => "drive",
            ResourceKind::GmailUserProfiles => "gmail_user_profiles",
        }
    }

    pub fn method(&self) -> ApiMethod {
        match self {
            ResourceKind::Users => USERS_LIST,
            ResourceKind::Meets
            | ResourceKind::Calendar
            | ResourceKind::UserAccounts
            | ResourceKind::Logins
            | ResourceKind::Chat
            | ResourceKind::Drive => ACTIVITIES_LIST,
            ResourceKind::Usage => USER_USAGE_GET,
            ResourceKind::Courses => COURSES_LIST,
            ResourceKind::CourseWork => COURSE_WORK_LIST,
            ResourceKind::GmailUserProfiles => GMAIL_PROFILE_GET,
        }
    }

    /// Response field holding the record array; `None` when the whole
    /// response is the record.
    pub fn record_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Users => Some("users"),
            ResourceKind::Meets
            | ResourceKind::Calendar
            | ResourceKind::UserAccounts
            | ResourceKind::Logins
            | ResourceKind::Chat
            | ResourceKind::Drive => Some("items"),
            ResourceKind::Usage => Some("usageReports"),
            ResourceKind::Courses => Some("courses"),
            ResourceKind::CourseWork => Some("courseWork"),
            ResourceKind::GmailUserProfiles => None,
        }
    }

    /// Parameter overwritten on every iteration of a fan-out or sweep.
    pub fn iteration_param(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Usage => Some("date"),
            ResourceKind::CourseWork => Some("courseId"),
            ResourceKind::GmailUserProfiles => Some("userId"),
            _ => None,
        }
    }

    pub fn key_source(&self) -> Option<KeySource> {
        match self {
            ResourceKind::CourseWork => Some(KeySource {
                resource: ResourceKind::Courses,
                field: "id",
            }),
            ResourceKind::GmailUserProfiles => Some(KeySource {
                resource: ResourceKind::Users,
                field: "primaryEmail",
            }),
            _ => None,
        }
    }

    /// Side file listing the keys that failed during a fan-out run.
    pub fn error_file(&self) -> Option<&'static str> {
        match self {
            ResourceKind::CourseWork => Some("course_work.err"),
            ResourceKind::GmailUserProfiles => Some("gmail_user_profiles.err"),
            _ => None,
        }
    }

    /// Builds the descriptor from this resource's configuration block.
    pub fn descriptor(&self, config: &Config) -> Result<ResourceDescriptor> {
        let resource = config.resource(self.config_key()).ok_or_else(|| {
            Error::Config(format!("resources.{} is not configured", self.config_key()))
        })?;

        let descriptor = ResourceDescriptor {
            name: self.config_key(),
            method: self.method(),
            params: resource.api_parameters(),
            record_field: self.record_field().map(str::to_string),
            table_id: resource.table_id.clone(),
            iteration_param: self.iteration_param(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Everything the paginator needs to drive one resource to exhaustion.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub method: ApiMethod,
    pub params: Params,
    pub record_field: Option<String>,
    pub table_id: String,
    /// Filled per key or per date by a driver; may be absent from `params`
    /// until then.
    pub iteration_param: Option<&'static str>,
}

impl ResourceDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.table_id.trim().is_empty() {
            return Err(Error::Validation(format!("{}: table id is empty", self.name)));
        }

        match (&self.record_field, self.method.paging) {
            (None, Paging::Paged) => {
                return Err(Error::Validation(format!(
                    "{}: paged method {} needs a record field",
                    self.name, self.method.name
                )));
            }
            (Some(field), _) if field.is_empty() => {
                return Err(Error::Validation(format!("{}: record field is empty", self.name)));
            }
            _ => {}
        }

        let missing = self
            .method
            .placeholders()
            .filter(|p| Some(*p) != self.iteration_param && !self.params.contains_key(*p))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "{}: missing path parameters {}",
                self.name,
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// A fresh descriptor with `name` set to `value`; `self` is left untouched.
    pub fn with_param(&self, name: &str, value: impl Into<Value>) -> ResourceDescriptor {
        let mut descriptor = self.clone();
        descriptor.params.insert(name.to_string(), value.into());
        descriptor
    }

    /// The initial list call, built from a snapshot of the current parameters.
    pub fn first_request(&self) -> Result<ApiRequest> {
        if let Some(missing) = self
            .method
            .placeholders()
            .find(|p| !self.params.contains_key(*p))
        {
            return Err(Error::Validation(format!(
                "{}: path parameter `{}` is not set",
                self.name, missing
            )));
        }
        Ok(ApiRequest::new(self.method, self.params.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn every_resource_has_a_valid_default_descriptor() {
        let config = Config::default();
        for kind in ResourceKind::ALL {
            let descriptor = kind.descriptor(&config).unwrap();
            assert_eq!(descriptor.name, kind.config_key());
        }
    }

    #[test]
    fn every_resource_builds_from_a_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("puller.toml");
        std::fs::write(
            &path,
            "[resources.meets]\ntable_id = \"meet_activity\"\nmethod_parameters = { max_results = 200 }\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();

        for kind in ResourceKind::ALL {
            kind.descriptor(&config).unwrap();
        }

        let meets = ResourceKind::Meets.descriptor(&config).unwrap();
        assert_eq!(meets.table_id, "meet_activity");
        assert_eq!(meets.params.get("applicationName"), Some(&json!("meet")));
        assert_eq!(meets.params.get("userKey"), Some(&json!("all")));
        assert_eq!(meets.params.get("maxResults"), Some(&json!(200)));
        let request = meets.first_request().unwrap();
        assert!(request.params.contains_key("maxResults"));
    }

    #[test]
    fn activity_resources_share_one_method() {
        let config = Config::default();
        let drive = ResourceKind::Drive.descriptor(&config).unwrap();
        let chat = ResourceKind::Chat.descriptor(&config).unwrap();

        assert_eq!(drive.method, chat.method);
        assert_eq!(drive.params.get("applicationName"), Some(&json!("drive")));
        assert_eq!(chat.params.get("applicationName"), Some(&json!("chat")));
    }

    #[test]
    fn placeholders_are_listed_in_order() {
        assert_eq!(
            ACTIVITIES_LIST.placeholders().collect::<Vec<_>>(),
            vec!["userKey", "applicationName"]
        );
        assert_eq!(USERS_LIST.placeholders().count(), 0);
    }

    #[test]
    fn iteration_param_may_be_unset_until_a_driver_fills_it() {
        let config = Config::default();
        let course_work = ResourceKind::CourseWork.descriptor(&config).unwrap();

        assert!(course_work.first_request().is_err());
        let one_course = course_work.with_param("courseId", "123");
        let request = one_course.first_request().unwrap();
        assert_eq!(request.params.get("courseId"), Some(&json!("123")));
    }

    #[test]
    fn with_param_leaves_the_template_untouched() {
        let config = Config::default();
        let template = ResourceKind::Usage.descriptor(&config).unwrap();
        let dated = template.with_param("date", "2024-01-31");

        assert!(!template.params.contains_key("date"));
        assert_eq!(dated.params.get("date"), Some(&json!("2024-01-31")));
    }

    #[test]
    fn missing_path_parameter_fails_validation() {
        let mut config = Config::default();
        if let Some(meets) = config.resources.get_mut("meets") {
            meets.method_parameters.remove("application_name");
        }

        let err = ResourceKind::Meets.descriptor(&config).unwrap_err();
        assert!(err.to_string().contains("applicationName"), "{err}");
    }

    #[test]
    fn unconfigured_resource_is_a_config_error() {
        let mut config = Config::default();
        config.resources.remove("chat");
        assert!(matches!(
            ResourceKind::Chat.descriptor(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn dependent_resources_name_their_key_source() {
        assert_eq!(
            ResourceKind::CourseWork.key_source(),
            Some(KeySource { resource: ResourceKind::Courses, field: "id" })
        );
        assert_eq!(
            ResourceKind::GmailUserProfiles.key_source().map(|s| s.field),
            Some("primaryEmail")
        );
        assert_eq!(ResourceKind::Users.key_source(), None);
    }
}
