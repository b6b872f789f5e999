use egressplane::validation::{parse_change_password, parse_create, parse_edit};
use proptest::prelude::*;
use serde_json::json;

fn create_fields(port: i64, timeout: i64, host: &str) -> serde_json::Value {
    json!({
        "cluster_id": 1,
        "name": "gnupg",
        "is_active": true,
        "host": host,
        "port": port,
        "dircache": true,
        "user": "anonymous",
        "timeout": timeout
    })
}

fn rules_for(err: &egressplane::EgressError, field: &str) -> Vec<String> {
    err.violations().iter().filter(|v| v.field == field).map(|v| v.rule.clone()).collect()
}

proptest! {
    #[test]
    fn mismatched_passwords_are_rejected(a in "[ -~]{1,32}", b in "[ -~]{1,32}") {
        prop_assume!(a != b);
        let err = parse_change_password(&json!({"id": 1, "password1": a, "password2": b}))
            .unwrap_err();
        prop_assert_eq!(rules_for(&err, "password2"), vec!["must_match".to_string()]);
    }

    #[test]
    fn matching_passwords_are_accepted(password in "[ -~]{1,64}") {
        let request = parse_change_password(
            &json!({"id": 3, "password1": password, "password2": password}),
        );
        prop_assert!(request.is_ok());
    }

    #[test]
    fn ports_in_range_are_accepted(port in 1i64..=65535) {
        prop_assert!(parse_create(&create_fields(port, 2000, "ftp.gnupg.dk")).is_ok());
    }

    #[test]
    fn ports_out_of_range_are_rejected(port in prop_oneof![i64::MIN..1i64, 65536i64..i64::MAX]) {
        let err = parse_create(&create_fields(port, 2000, "ftp.gnupg.dk")).unwrap_err();
        prop_assert_eq!(rules_for(&err, "port"), vec!["range".to_string()]);
    }

    #[test]
    fn non_positive_timeouts_are_rejected(timeout in i64::MIN..=0i64) {
        let err = parse_create(&create_fields(21, timeout, "ftp.gnupg.dk")).unwrap_err();
        prop_assert_eq!(rules_for(&err, "timeout"), vec!["range".to_string()]);
    }

    #[test]
    fn dns_hosts_are_accepted(host in "[a-z][a-z0-9]{0,20}(\\.[a-z][a-z0-9]{0,20}){0,3}") {
        prop_assert!(parse_create(&create_fields(21, 2000, &host)).is_ok());
    }

    #[test]
    fn hosts_with_spaces_are_rejected(left in "[a-z]{1,10}", right in "[a-z]{1,10}") {
        let host = format!("{} {}", left, right);
        let err = parse_create(&create_fields(21, 2000, &host)).unwrap_err();
        prop_assert_eq!(rules_for(&err, "host"), vec!["format".to_string()]);
    }

    #[test]
    fn string_ids_are_type_errors(id in "[0-9]{1,6}") {
        let err = parse_edit(&json!({"id": id, "port": 21})).unwrap_err();
        prop_assert_eq!(rules_for(&err, "id"), vec!["type".to_string()]);
    }
}
