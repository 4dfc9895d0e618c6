//! Email bodies for credential delivery.

use std::fmt::Write as _;

use super::EmailMessage;
use crate::sponsorship::GeneratedKeys;

/// Full credential bundle sent once, right after a sponsored account is
/// created.
pub fn credential_email(to: &str, account: &str, sponsor: &str, keys: &GeneratedKeys) -> EmailMessage {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{sponsor} created the Hive account @{account} for you.\n\n\
         Store these keys somewhere safe. Anyone holding them controls the account.\n"
    );
    if let Some(master) = keys.master_password.as_deref() {
        let _ = writeln!(text, "Master password: {master}");
    }
    if let Some(owner) = keys.owner.as_deref() {
        let _ = writeln!(text, "Owner key:       {owner}");
    }
    if let Some(active) = keys.active.as_deref() {
        let _ = writeln!(text, "Active key:      {active}");
    }
    let _ = writeln!(text, "Posting key:     {}", keys.posting.as_str());
    if let Some(memo) = keys.memo.as_deref() {
        let _ = writeln!(text, "Memo key:        {memo}");
    }
    let _ = write!(
        text,
        "\nWe keep an encrypted copy of the posting key only, so you can post \
         right away. The other keys are not stored and cannot be sent again."
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("Your new Hive account @{account}"),
        text,
        partial_backup: false,
    }
}

/// Re-issue of the custodied posting key. Always a partial backup.
pub fn posting_backup_email(to: &str, account: &str, posting_wif: &str) -> EmailMessage {
    let text = format!(
        "Here is the posting key for @{account} you asked us to resend.\n\n\
         Posting key: {posting_wif}\n\n\
         This is a partial backup. Only the posting key is held in custody; \
         owner, active and memo keys were never stored and cannot be recovered \
         through this email. If you have lost them, recover the account through \
         the chain's account recovery process."
    );
    EmailMessage {
        to: to.to_string(),
        subject: format!("Posting key backup for @{account}"),
        text,
        partial_backup: true,
    }
}
