//! Last.fm request signing
//!
//! `api_sig` is the MD5 hex digest of every parameter except `format` and
//! `callback`, sorted by name and concatenated as `name` + `value`, with
//! the shared secret appended.

/// Parameters never included in the signature
const UNSIGNED_PARAMS: [&str; 2] = ["format", "callback"];

/// Compute `api_sig` for a parameter set
pub fn sign_params(params: &[(&str, String)], secret: &str) -> String {
    let mut signed: Vec<&(&str, String)> = params
        .iter()
        .filter(|(name, _)| !UNSIGNED_PARAMS.contains(name))
        .collect();
    signed.sort_by(|a, b| a.0.cmp(b.0));

    let mut raw = String::new();
    for (name, value) in signed {
        raw.push_str(name);
        raw.push_str(value);
    }
    raw.push_str(secret);

    format!("{:x}", md5::compute(raw.as_bytes()))
}
