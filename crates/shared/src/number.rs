//! Canonical number handling shared by the inbound and outbound paths.

use crate::domain::Jid;

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const STATUS_BROADCAST: &str = "status@broadcast";

const REJECTED_SERVERS: [&str; 3] = ["g.us", "broadcast", "newsletter"];

/// Canonical number form: the bare digits of the user part, without server,
/// device suffix, `+` or whitespace.
pub fn clean_number(raw: &str) -> String {
    let user = raw.split('@').next().unwrap_or_default();
    let user = user.split(':').next().unwrap_or_default();
    user.chars()
        .filter(|c| *c != '+' && !c.is_whitespace())
        .collect()
}

/// Addressable JID for a number in any accepted spelling.
pub fn to_jid(raw: &str) -> Jid {
    Jid(format!("{}@{USER_SERVER}", clean_number(raw)))
}

/// Group, broadcast and channel addresses are not routable senders.
pub fn is_valid_number(raw: &str) -> bool {
    if let Some((_, server)) = raw.split_once('@') {
        if REJECTED_SERVERS.contains(&server) {
            return false;
        }
    }
    let number = clean_number(raw);
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}
