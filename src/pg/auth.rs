//! Authentication negotiation for the startup handshake.
//!
//! The server's authentication request subtype selects the response: `0`
//! needs none, `3` a cleartext password, `5` an MD5 digest salted with four
//! bytes from the request. Both password paths fail before any bytes are
//! written when no password is configured.

use super::connection::Config;
use super::error::{PgError, PgResult};
use super::protocol::PasswordMessage;

/// Response to a cleartext password request (subtype 3).
pub(crate) fn cleartext_response(config: &Config) -> PgResult<PasswordMessage> {
    let password = config
        .password
        .as_deref()
        .ok_or_else(|| PgError::Auth("server requires a password, none configured".into()))?;
    Ok(PasswordMessage {
        password: password.to_string(),
    })
}

/// Response to an MD5 password request (subtype 5).
pub(crate) fn md5_response(config: &Config, salt: [u8; 4]) -> PgResult<PasswordMessage> {
    let password = config.password.as_deref().ok_or_else(|| {
        PgError::Auth("server requires MD5 password authentication, none configured".into())
    })?;
    Ok(PasswordMessage {
        password: md5_password(&config.user, password, salt),
    })
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`, all ASCII hex.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}").as_bytes());
    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(&outer_input))
}
