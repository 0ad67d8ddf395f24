use std::sync::Arc;

use url::Url;

use super::{AccessCheck, AccessRule, FindingTemplate, IdEndpoint, TargetDefinition, TestKind, TokenFollowup, UploadRule};
use crate::config::NetbearConfig;
use crate::engine::candidate::IdKind;
use crate::errors::ConfigError;
use crate::findings::Severity;

const DAV_FILES: &str = "/remote.php/dav/files/";
const SHARES_API: &str = "/ocs/v2.php/apps/files_sharing/api/v1/shares/";
const USERS_API: &str = "/ocs/v2.php/apps/provisioning_api/api/v1/users/";
const SHARES_LIST: &str = "/ocs/v2.php/apps/files_sharing/api/v1/shares";
const USERS_LIST: &str = "/ocs/v2.php/apps/provisioning_api/api/v1/users";
const APPS_API: &str = "/ocs/v2.php/apps/provisioning_api/api/v1/apps";
const UPLOAD_DIR: &str = "Netbear_Test_Uploads";
const MARKER: &str = "netbear upload probe marker";

const ADMIN_ENDPOINTS: &[&str] = &[
    "/ocs/v2.php/apps/admin_audit/api/v1/logs",
    "/ocs/v2.php/apps/provisioning_api/api/v1/config/apps",
    "/settings/admin/",
    "/ocs/v2.php/apps/user_ldap/api/v1/config",
];

const COMMON_FILES: &[&str] = &["README.md", "Photos/", "Documents/", "test.txt", "config.php", ".htaccess"];

const BYPASS_VARIANTS: &[(&str, &str)] = &[
    ("file.txt%00.php", "null_byte"),
    ("File.txt", "case"),
    ("%252e%252e/", "double_encode"),
];

fn ocs() -> Vec<(String, String)> {
    vec![("OCS-APIRequest".to_string(), "true".to_string())]
}

impl TargetDefinition {
    /// Built-in definitions for a NextCloud instance, enumerated as `username`.
    pub fn nextcloud(base_url: Url, username: &str, config: &NetbearConfig) -> Result<Self, ConfigError> {
        let mut target = TargetDefinition::new("nextcloud", base_url, username);
        target.status_path = Some("/status.php".to_string());

        let base = target.base_url.to_string();
        let invalid = |what: &str| ConfigError::Invalid(format!("cannot build {what} URL from {base}"));
        let mut user_dav = target.url_for(DAV_FILES).map_err(|_| invalid("WebDAV"))?;
        user_dav
            .path_segments_mut()
            .map_err(|_| invalid("WebDAV"))?
            .pop_if_empty()
            .push(username)
            .push("");
        let shares = target.url_for(SHARES_API).map_err(|_| invalid("shares API"))?;
        let users = target.url_for(USERS_API).map_err(|_| invalid("provisioning API"))?;
        let public = target.url_for("/s/").map_err(|_| invalid("public link"))?;

        target.id_endpoints = vec![
            Arc::new(IdEndpoint {
                kind: IdKind::FileId,
                template: format!("{user_dav}{{id}}"),
                headers: Vec::new(),
                expect_json: false,
                finding: FindingTemplate::new(
                    "file_id_idor",
                    Severity::High,
                    DAV_FILES,
                    "File IDs may be enumerable or accessible across users",
                    "Direct file access without authorization",
                ),
            }),
            Arc::new(IdEndpoint {
                kind: IdKind::ShareId,
                template: format!("{shares}{{id}}"),
                headers: ocs(),
                expect_json: false,
                finding: FindingTemplate::new(
                    "share_id_idor",
                    Severity::High,
                    SHARES_API,
                    "Share IDs may be enumerable or have info disclosure",
                    "Unauthorized access to share details and modification",
                ),
            }),
            Arc::new(IdEndpoint {
                kind: IdKind::UserId,
                template: format!("{users}{{id}}?format=json"),
                headers: ocs(),
                expect_json: true,
                finding: FindingTemplate::new(
                    "user_id_idor",
                    Severity::Medium,
                    USERS_API,
                    "User profiles may be enumerable",
                    "Information disclosure on user profiles",
                ),
            }),
            Arc::new(IdEndpoint {
                kind: IdKind::Token,
                template: format!("{public}{{id}}"),
                headers: Vec::new(),
                expect_json: false,
                finding: FindingTemplate::new(
                    "token_enumeration",
                    Severity::High,
                    "/s/",
                    "Public share tokens can be enumerated",
                    "Unauthorized access to shared resources",
                ),
            }),
        ];

        // Access rule paths are relative to the base URL, which may carry its own prefix.
        let prefix = target.base_url.path().trim_end_matches('/');
        let dav_path = user_dav.path().strip_prefix(prefix).unwrap_or(user_dav.path()).to_string();
        let mut rules = recon_rules();
        rules.push(
            AccessRule::get(
                TestKind::PublicLinks,
                &format!("{SHARES_LIST}?public=true&format=json"),
                "public shares",
                AccessCheck::ShareList { public_only: true, harvest_tokens: true },
                FindingTemplate::new(
                    "public_shares_enumeration",
                    Severity::Medium,
                    SHARES_LIST,
                    "Public shares can be listed",
                    "Listed public links can be opened by anyone holding the URL",
                ),
            )
            .headers(ocs()),
        );
        rules.push(
            AccessRule::get(
                TestKind::Auth,
                &format!("{APPS_API}?format=json"),
                "basic auth",
                AccessCheck::BasicAuth,
                FindingTemplate::new(
                    "basic_auth_used",
                    Severity::Medium,
                    APPS_API,
                    "Basic authentication accepted (should be token/bearer)",
                    "Credentials travel in every request header",
                ),
            )
            .headers(ocs()),
        );
        for path in ADMIN_ENDPOINTS {
            let finding = FindingTemplate::new(
                "admin_access",
                Severity::Critical,
                path,
                "Non-admin can access admin endpoints",
                "Full system compromise, privilege escalation",
            );
            rules.push(AccessRule::get(TestKind::Auth, path, path, AccessCheck::Reachable, finding).headers(ocs()));
        }
        for file in COMMON_FILES {
            let finding = FindingTemplate::new(
                "direct_file_access",
                Severity::Medium,
                DAV_FILES,
                "Files accessible via direct paths",
                "Potential unauthorized file disclosure",
            );
            let path = format!("{dav_path}{file}");
            rules.push(AccessRule::get(TestKind::Idor, &path, file, AccessCheck::Reachable, finding));
        }
        for (variant, method) in BYPASS_VARIANTS {
            let finding = FindingTemplate::new(
                "permission_bypass",
                Severity::High,
                DAV_FILES,
                "File permissions can be bypassed",
                "Unauthorized file access",
            );
            let path = format!("{dav_path}{variant}");
            rules.push(AccessRule::get(TestKind::Auth, &path, method, AccessCheck::Reachable, finding));
        }
        target.access_rules = rules.into_iter().map(Arc::new).collect();
        target.token_followups = token_followups();

        let mut upload_base = user_dav.clone();
        upload_base
            .path_segments_mut()
            .map_err(|_| invalid("upload"))?
            .pop_if_empty()
            .push(UPLOAD_DIR)
            .push("");
        target.upload_base = Some(upload_base);
        target.upload_rules = upload_rules(config);

        Ok(target)
    }
}

fn recon_rules() -> Vec<AccessRule> {
    vec![
        AccessRule::get(
            TestKind::Recon,
            "/status.php",
            "status",
            AccessCheck::SystemInfo,
            FindingTemplate::new(
                "system_info",
                Severity::Info,
                "/status.php",
                "Server version and install state are public",
                "Version disclosure narrows the search for known vulnerabilities",
            ),
        ),
        AccessRule::get(
            TestKind::Recon,
            &format!("{USERS_LIST}?limit=100&format=json"),
            "user list",
            AccessCheck::UserList,
            FindingTemplate::new(
                "user_enumeration",
                Severity::High,
                USERS_LIST,
                "User IDs exposed via the provisioning API",
                "User enumeration can aid in brute force or targeted attacks",
            ),
        )
        .headers(ocs()),
        AccessRule::get(
            TestKind::Recon,
            &format!("{SHARES_LIST}?format=json"),
            "share list",
            AccessCheck::ShareList { public_only: false, harvest_tokens: false },
            FindingTemplate::new(
                "shares_enumeration",
                Severity::Medium,
                SHARES_LIST,
                "Shares can be enumerated",
                "Can identify shared resources and potential IDOR vectors",
            ),
        )
        .headers(ocs()),
        AccessRule::get(
            TestKind::Recon,
            &format!("{SHARES_LIST}?reshares=true&shared_with_me=false&format=json"),
            "public link list",
            AccessCheck::ShareList { public_only: true, harvest_tokens: false },
            FindingTemplate::new(
                "public_links",
                Severity::Medium,
                SHARES_LIST,
                "Public share links are listed",
                "Public links may be leaked or enumerable",
            ),
        )
        .headers(ocs()),
    ]
}

fn token_followups() -> Vec<TokenFollowup> {
    let direct = AccessRule::get(
        TestKind::PublicLinks,
        "/s/{token}",
        "direct_access",
        AccessCheck::NoPasswordPrompt,
        FindingTemplate::new(
            "share_access_control",
            Severity::High,
            "/s/",
            "Public share opens without a password",
            "Unauthorized access to shared resources",
        ),
    )
    .unauthenticated();
    let password = AccessRule::get(
        TestKind::PublicLinks,
        "/s/{token}",
        "password",
        AccessCheck::NoPasswordPrompt,
        FindingTemplate::new(
            "password_bypass",
            Severity::High,
            "/s/",
            "Password-protected shares can be bypassed",
            "Unauthorized access to sensitive shared resources",
        ),
    )
    .unauthenticated();
    vec![
        TokenFollowup { rule: direct, with_passwords: false },
        TokenFollowup { rule: password, with_passwords: true },
    ]
}

fn upload_rules(config: &NetbearConfig) -> Vec<Arc<UploadRule>> {
    let bypass = FindingTemplate::new(
        "file_type_bypass",
        Severity::Critical,
        DAV_FILES,
        "File type validation accepts dangerous extensions",
        "Executable files can be stored on the server",
    );
    let markup = FindingTemplate::new(
        "stored_markup_upload",
        Severity::High,
        DAV_FILES,
        "Active markup files can be stored and served back",
        "Stored markup may be rendered in other users' sessions",
    );

    let mut rules = Vec::new();
    let mut push = |filename: String, label: &str, content: &[u8], finding: &FindingTemplate| {
        rules.push(Arc::new(UploadRule {
            filename,
            label: label.to_string(),
            content: content.to_vec(),
            finding: finding.clone(),
        }));
    };

    for ext in &config.dangerous_extensions {
        let ext = if ext.starts_with('.') { ext.clone() } else { format!(".{ext}") };
        push(format!("netbear_probe{ext}"), "direct extension", MARKER.as_bytes(), &bypass);
    }
    push("netbear_probe.jpg.php".into(), "double extension", MARKER.as_bytes(), &bypass);
    push("netbear_probe.php.jpg".into(), "reverse double extension", MARKER.as_bytes(), &bypass);
    push("netbear_probe.JPG.php".into(), "case variation", MARKER.as_bytes(), &bypass);

    let html = format!("<p>{MARKER}</p>");
    let svg = format!("<svg xmlns=\"http://www.w3.org/2000/svg\"><text>{MARKER}</text></svg>");
    push("netbear_probe.html".into(), "html document", html.as_bytes(), &markup);
    push("netbear_probe.svg".into(), "svg image", svg.as_bytes(), &markup);

    let oversized = FindingTemplate::new(
        "upload_limit_bypass",
        Severity::Medium,
        DAV_FILES,
        "Upload size limit not enforced",
        "Attackers can consume storage or exhaust disk",
    );
    let large = vec![b'A'; config.max_upload_size + 1];
    push("netbear_probe_large.bin".into(), "size limit", large.as_slice(), &oversized);

    rules
}
