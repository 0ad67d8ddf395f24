use serde_json::json;
use url::Url;

use crate::findings::{Severity, Signal};

/// Parameter names that commonly carry direct object references.
const IDOR_PARAMS: &[&str] = &[
    "id", "uid", "userid", "accountid", "playerid", "profileid", "customerid", "orderid", "ticketid", "invoiceid",
    "productid", "doctorid", "patientid", "appointmentid", "roomid", "bookingid", "slotid", "betid",
    "transactionid", "walletid", "fileid", "shareid",
];

const SENSITIVE_MARKERS: &[&str] = &["token", "key", "secret", "auth", "session", "admin", "role"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    Idor,
    Sensitive,
    Plain,
}

/// `user_id`, `userId` and `USERID` all fold to `userid`.
fn fold(name: &str) -> String {
    name.chars().filter(|c| *c != '_' && *c != '-').flat_map(char::to_lowercase).collect()
}

pub fn classify_param(name: &str) -> ParamClass {
    let folded = fold(name);
    if folded.is_empty() {
        return ParamClass::Plain;
    }
    let id_suffix = name.ends_with("_id") || name.ends_with("Id") || name.ends_with("ID");
    if IDOR_PARAMS.contains(&folded.as_str()) || id_suffix {
        return ParamClass::Idor;
    }
    if SENSITIVE_MARKERS.iter().any(|m| folded.contains(m)) {
        return ParamClass::Sensitive;
    }
    ParamClass::Plain
}

/// Signals for the interesting parameter names found on one page.
pub fn param_signals(page: &Url, params: &[String]) -> Vec<Signal> {
    let endpoint = format!("{}{}", page.origin().ascii_serialization(), page.path());
    params
        .iter()
        .filter_map(|p| {
            let (kind, severity, description, impact) = match classify_param(p) {
                ParamClass::Idor => (
                    "idor_parameter",
                    Severity::High,
                    format!("Parameter '{p}' looks like a direct object reference"),
                    "Changing the value may expose other users' records",
                ),
                ParamClass::Sensitive => (
                    "sensitive_parameter",
                    Severity::Medium,
                    format!("Parameter '{p}' carries credentials or privilege state"),
                    "Values may leak through logs, referrers or history",
                ),
                ParamClass::Plain => return None,
            };
            Some(Signal {
                kind: kind.to_string(),
                severity,
                endpoint: endpoint.clone(),
                description,
                impact: impact.to_string(),
                evidence: json!({ "param": p, "url": page.as_str() }),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("id", ParamClass::Idor)]
    #[case("userId", ParamClass::Idor)]
    #[case("bet_id", ParamClass::Idor)]
    #[case("AccountID", ParamClass::Idor)]
    #[case("invoice_id", ParamClass::Idor)]
    #[case("access_token", ParamClass::Sensitive)]
    #[case("api_key", ParamClass::Sensitive)]
    #[case("isAdmin", ParamClass::Sensitive)]
    #[case("page", ParamClass::Plain)]
    #[case("idea", ParamClass::Plain)]
    fn classifies_names(#[case] name: &str, #[case] expected: ParamClass) {
        assert_eq!(classify_param(name), expected);
    }

    #[test]
    fn signals_only_for_interesting_params() {
        let page = Url::parse("https://shop.example.com/orders?orderId=4&sort=asc").unwrap();
        let params = vec!["orderId".to_string(), "session".to_string(), "sort".to_string()];
        let signals = param_signals(&page, &params);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].kind, "idor_parameter");
        assert_eq!(signals[0].severity, Severity::High);
        assert_eq!(signals[0].endpoint, "https://shop.example.com/orders");
        assert_eq!(signals[1].kind, "sensitive_parameter");
    }
}
