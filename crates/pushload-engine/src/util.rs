//! Scenario utilities.

use rand::Rng;

/// A fresh channel ID (hex, no dashes).
pub fn random_channel_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Random payload bytes, between `min_length` and `max_length` long.
pub fn random_data(min_length: usize, max_length: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let length = rng.random_range(min_length..=max_length);
    let mut data = vec![0u8; length];
    rng.fill(&mut data[..]);
    data
}

/// Random lowercase alphanumeric string.
pub fn string_generator(length: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

/// Given a valid endpoint URL, return one whose trailing token is garbage of
/// `token_length`. With no endpoint, return a bogus path entirely; with no
/// length, pick a random one.
pub fn bad_push_endpoint(push_endpoint: Option<&str>, token_length: Option<usize>) -> String {
    let endpoint = push_endpoint.unwrap_or("/zoot/allures/cgi-bin/xyz");
    let token_length = token_length.unwrap_or_else(|| rand::rng().random_range(1..=1000));
    let token = string_generator(token_length);
    match endpoint.rfind('/') {
        Some(pos) => format!("{}/{token}", &endpoint[..pos]),
        None => format!("{endpoint}/{token}"),
    }
}
