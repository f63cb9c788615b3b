use serde::Deserialize;
use serde_json::Value;

use crate::{
    auth::{
        services::{email_errors, normalize_email},
        Role,
    },
    error::{AppError, AppResult},
};

/// Admin edit of another user. Passwords only change through the auth routes.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub photo: Option<String>,
}

/// Self-service profile edit. Password fields are only read to reject them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<Value>,
    pub password_confirm: Option<Value>,
}

fn profile_errors(name: Option<&str>, email: Option<&str>, errors: &mut Vec<String>) {
    if name == Some("") {
        errors.push("Please tell us your name!".into());
    }
    if email.is_some() {
        errors.extend(email_errors(email));
    }
}

impl UpdateUser {
    pub fn validate(self) -> AppResult<UserPatch> {
        let mut errors = Vec::new();
        let name = self.name.map(|n| n.trim().to_string());
        profile_errors(name.as_deref(), self.email.as_deref(), &mut errors);
        let role = match self.role.as_deref() {
            None => None,
            Some(raw) => {
                let parsed = Role::parse(raw);
                if parsed.is_none() {
                    errors.push("Role is either: user, guide, lead-guide or admin".into());
                }
                parsed
            }
        };
        AppError::check_input(errors)?;
        Ok(UserPatch {
            name,
            email: self.email.as_deref().map(normalize_email),
            role,
            photo: self.photo,
        })
    }
}

impl UpdateMeRequest {
    /// Only name and email survive.
    pub fn validate(self) -> AppResult<(Option<String>, Option<String>)> {
        if self.password.is_some() || self.password_confirm.is_some() {
            return Err(AppError::bad_request(
                "This route is not for password updates. Please use /updateMyPassword.",
            ));
        }
        let mut errors = Vec::new();
        let name = self.name.map(|n| n.trim().to_string());
        profile_errors(name.as_deref(), self.email.as_deref(), &mut errors);
        AppError::check_input(errors)?;
        Ok((name, self.email.as_deref().map(normalize_email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_me_refuses_passwords() {
        let req: UpdateMeRequest =
            serde_json::from_str(r#"{"name":"New Name","password":"pass1234"}"#).unwrap();
        let err = req.validate().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(
            err.to_string(),
            "This route is not for password updates. Please use /updateMyPassword."
        );
    }

    #[test]
    fn update_me_keeps_name_and_email_only() {
        let req: UpdateMeRequest = serde_json::from_str(
            r#"{"name":" Leo Gillespie ","email":"Leo@Example.io","role":"admin"}"#,
        )
        .unwrap();
        let (name, email) = req.validate().unwrap();
        assert_eq!(name.as_deref(), Some("Leo Gillespie"));
        assert_eq!(email.as_deref(), Some("leo@example.io"));
    }

    #[test]
    fn admin_patch_checks_role_and_email() {
        let patch = UpdateUser {
            role: Some("lead-guide".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.role, Some(Role::LeadGuide));

        let msg = UpdateUser {
            role: Some("owner".into()),
            email: Some("broken".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err()
        .to_string();
        assert!(msg.contains("Role is either"));
        assert!(msg.contains("Please provide a valid email"));
    }
}
