//! Stanza id generation.

/// Generate a random id suitable as an XMPP stanza id: 128 bits from the OS RNG,
/// rendered as 32 lowercase hex characters.
pub fn new_id() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)?;
    Ok(hex::encode(bytes))
}
