use std::collections::HashMap;

use super::*;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn missing_file_keeps_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings(&dir.path().join("absent.toml")).expect("settings");
    assert_eq!(settings.session_root, PathBuf::from("./sessions"));
    assert_eq!(settings.browser, BrowserIdentity::default());
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bot.toml");
    fs::write(
        &path,
        r#"
bot_name = "shop"
use_pairing_code = true
phone_number = "+34 600 111 222"
browser = ["Ubuntu", "Firefox", "120.0"]
reconnect_delay_ms = 1500
"#,
    )
    .expect("write settings");

    let settings = load_settings(&path).expect("settings");
    assert_eq!(settings.bot_name, "shop");
    assert!(settings.use_pairing_code);
    assert_eq!(settings.browser.as_triple(), ["Ubuntu", "Firefox", "120.0"]);

    let provider = settings.provider_config();
    assert_eq!(provider.pairing_phone().as_deref(), Some("34600111222"));
    assert_eq!(provider.reconnect_delay, Duration::from_millis(1500));
}

#[test]
fn unknown_file_keys_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bot.toml");
    fs::write(&path, "database_url = \"sqlite://x\"\n").expect("write settings");

    let err = load_settings(&path).expect_err("unknown key");
    assert!(format!("{err:#}").contains("invalid settings file"));
}

#[test]
fn prefixed_env_wins_over_plain_env() {
    let mut settings = Settings::default();
    settings.apply_env(env(&[
        ("BOT_NAME", "plain"),
        ("APP__BOT_NAME", "prefixed"),
        ("USE_CACHE", "false"),
        ("PORT", "4010"),
        ("GIF_PLAYBACK", "maybe"),
    ]));

    assert_eq!(settings.bot_name, "prefixed");
    assert!(!settings.use_cache);
    assert_eq!(settings.http_bind, "127.0.0.1:4010");
    assert!(!settings.gif_playback);
}
