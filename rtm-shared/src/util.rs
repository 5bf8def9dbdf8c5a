use rand::Rng;

/// Characters eligible for generated identifiers: lowercase alphanumerics
/// with the easily-confused `l`, `o`, `0` and `1` left out, since CNAMEs
/// end up in logs and get compared by eye.
const IDENT_CHARS: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

const CNAME_USER_LEN: usize = 8;
const CNAME_HOST_LEN: usize = 12;

/// Generate a `user@host`-shaped canonical name for a session with no
/// configured identity.
///
/// A CNAME only has to stay unique and stable for the lifetime of the
/// process; nothing parses it, so a random identifier serves where a real
/// host lookup would otherwise be needed.
pub fn random_cname() -> String {
    let mut rng = rand::rng();
    let mut part = |n: usize| -> String {
        (0..n)
            .map(|_| IDENT_CHARS[rng.random_range(0..IDENT_CHARS.len())] as char)
            .collect()
    };

    let user = part(CNAME_USER_LEN);
    let host = part(CNAME_HOST_LEN);
    format!("{user}@{host}")
}
