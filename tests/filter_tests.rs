use netbear::filter::{classify_param, is_api_candidate, ParamClass};

#[test]
fn filter_detects_api() {
    assert!(is_api_candidate("https://example.com/api/v1/users"));
    assert!(is_api_candidate("https://example.com/v2/items"));
    assert!(!is_api_candidate("https://example.com/style.css"));
}

#[test]
fn param_names_classify() {
    assert_eq!(classify_param("file_id"), ParamClass::Idor);
    assert_eq!(classify_param("accountId"), ParamClass::Idor);
    assert_eq!(classify_param("api_key"), ParamClass::Sensitive);
    assert_eq!(classify_param("sort"), ParamClass::Plain);
}
