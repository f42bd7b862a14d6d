// src/services/exchange/auth.rs

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

/// Second-resolution unix timestamp (Gate signs with seconds)
pub fn unix_time() -> i64 {
    Utc::now().timestamp()
}

/// Millisecond timestamp
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sign REST requests: HMAC-SHA512 over
/// `method\npath\nquery\nSHA512(body)\ntimestamp`, hex encoded.
pub fn sign_rest(
    secret: &str,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
    timestamp: &str,
) -> String {
    let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
    let prehash = format!("{}\n{}\n{}\n{}\n{}", method, path, query, body_hash, timestamp);
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key bits of any size");
    mac.update(prehash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Sign a WebSocket subscription to a private channel
pub fn sign_ws(secret: &str, channel: &str, event: &str, time: i64) -> String {
    let prehash = format!("channel={}&event={}&time={}", channel, event, time);
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key bits of any size");
    mac.update(prehash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_signature_is_deterministic_hex() {
        let a = sign_rest("secret", "GET", "/api/v4/spot/order_book", "currency_pair=BTC_USDT", "", "1700000000");
        let b = sign_rest("secret", "GET", "/api/v4/spot/order_book", "currency_pair=BTC_USDT", "", "1700000000");
        assert_eq!(a, b);
        // HMAC-SHA512 digest, hex encoded
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rest_signature_varies_with_inputs() {
        let base = sign_rest("secret", "GET", "/p", "q=1", "", "1");
        assert_ne!(base, sign_rest("other", "GET", "/p", "q=1", "", "1"));
        assert_ne!(base, sign_rest("secret", "POST", "/p", "q=1", "", "1"));
        assert_ne!(base, sign_rest("secret", "GET", "/p", "q=1", "{}", "1"));
        assert_ne!(base, sign_rest("secret", "GET", "/p", "q=1", "", "2"));
    }

    #[test]
    fn ws_signature_covers_channel_event_time() {
        let a = sign_ws("secret", "spot.balances", "subscribe", 1700000000);
        assert_eq!(a.len(), 128);
        assert_ne!(a, sign_ws("secret", "spot.balances", "unsubscribe", 1700000000));
        assert_ne!(a, sign_ws("secret", "spot.balances", "subscribe", 1700000001));
    }
}
