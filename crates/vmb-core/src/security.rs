use crate::domain::UserId;

/// An empty allowlist admits everyone; otherwise the user must be listed.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return true;
    }
    allowed_users.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_rules() {
        assert!(!is_authorized(None, &[]));
        assert!(is_authorized(Some(UserId(7)), &[]));
        assert!(is_authorized(Some(UserId(7)), &[1, 7]));
        assert!(!is_authorized(Some(UserId(8)), &[1, 7]));
    }
}
