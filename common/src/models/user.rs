//! Caller identity used for access checks.

use serde::{Deserialize, Serialize};

use crate::models::database::ShareConfig;

/// Role of the calling user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees every database.
    SuperAdmin,
    Admin,
    User,
}

/// The calling user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub role: Role,
    /// Department id as received from the auth layer (number or string).
    #[serde(default)]
    pub department_id: Option<serde_json::Value>,
}

impl User {
    pub fn is_superadmin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

/// Coerces a department id to an integer.
///
/// Accepts integers, integral floats and numeric strings; anything else
/// yields `None`.
pub fn coerce_department_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ShareConfig {
    /// Whether a non-superadmin user passes the sharing rules.
    ///
    /// A value that cannot be coerced to an integer denies access.
    pub fn permits(&self, user: &User) -> bool {
        if self.is_shared {
            return true;
        }
        let Some(department) = user.department_id.as_ref().and_then(coerce_department_id) else {
            return false;
        };
        let allowed: Option<Vec<i64>> = self
            .accessible_departments
            .iter()
            .map(coerce_department_id)
            .collect();
        allowed.is_some_and(|ids| ids.contains(&department))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn user(department: Option<serde_json::Value>) -> User {
        User {
            user_id: "u1".into(),
            role: Role::User,
            department_id: department,
        }
    }

    #[rstest]
    #[case(json!(7), Some(7))]
    #[case(json!("7"), Some(7))]
    #[case(json!(" 12 "), Some(12))]
    #[case(json!(7.0), Some(7))]
    #[case(json!(7.5), None)]
    #[case(json!("seven"), None)]
    #[case(json!(null), None)]
    #[case(json!([7]), None)]
    fn test_coerce_department_id(#[case] value: serde_json::Value, #[case] expected: Option<i64>) {
        assert_eq!(coerce_department_id(&value), expected);
    }

    #[test]
    fn test_shared_permits_everyone() {
        assert!(ShareConfig::default().permits(&user(None)));
    }

    #[test]
    fn test_department_membership_with_mixed_representations() {
        let config = ShareConfig {
            is_shared: false,
            accessible_departments: vec![json!("3"), json!(5)],
        };
        assert!(config.permits(&user(Some(json!(3)))));
        assert!(config.permits(&user(Some(json!("5")))));
        assert!(!config.permits(&user(Some(json!(4)))));
        assert!(!config.permits(&user(None)));
    }

    #[test]
    fn test_non_coercible_values_deny() {
        let config = ShareConfig {
            is_shared: false,
            accessible_departments: vec![json!(3), json!("ops")],
        };
        assert!(!config.permits(&user(Some(json!(3)))));
        assert!(!ShareConfig::departments([3]).permits(&user(Some(json!("abc")))));
    }
}
