use sha2::{Digest, Sha256};

/// Stable vault id for a fetched document.
///
/// SHA-256 over the url, title and publish date, each prefixed with its
/// byte length so that field boundaries cannot shift ("ab"+"c" vs "a"+"bc").
/// An unknown date hashes as an empty field. Retrieval time is not an input.
pub fn item_id(url: &str, title: &str, published: Option<i64>) -> String {
    let published = published.map(|p| p.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    for field in [url, title, published.as_str()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
