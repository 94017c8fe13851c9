/// Redis key semantics - defines only naming, not runtime logic
/// Keeps API, CLI and worker reading and writing the same documents

pub const SUBMISSION_PREFIX: &str = "judge:submission";
pub const PROBLEM_PREFIX: &str = "judge:problem";
pub const TESTCASES_PREFIX: &str = "judge:testcases";
pub const RATE_LIMIT_PREFIX: &str = "judge:ratelimit";

/// Key holding one submission document
pub fn submission_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, submission_id)
}

/// Key holding one problem document
pub fn problem_key(problem_id: &str) -> String {
    format!("{}:{}", PROBLEM_PREFIX, problem_id)
}

/// Key holding the JSON array of a problem's test cases
pub fn testcases_key(problem_id: &str) -> String {
    format!("{}:{}", TESTCASES_PREFIX, problem_id)
}

/// Key holding one user's rate-limit record
pub fn rate_limit_key(user_id: &str) -> String {
    format!("{}:{}", RATE_LIMIT_PREFIX, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_submission_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = submission_key(&id);
        let key2 = submission_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("judge:submission:"));
        assert!(key1.contains(&id.to_string()));
    }

    #[test]
    fn test_problem_scoped_keys() {
        assert_eq!(problem_key("two-sum"), "judge:problem:two-sum");
        assert_eq!(testcases_key("two-sum"), "judge:testcases:two-sum");
    }

    #[test]
    fn test_rate_limit_key_format() {
        assert_eq!(rate_limit_key("u42"), "judge:ratelimit:u42");
    }
}
