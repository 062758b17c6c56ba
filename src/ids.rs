use uuid::Uuid;

/// Fresh record id of the form `<prefix>-<uuid>`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Eight uppercase hex characters drawn from a fresh v4 uuid.
fn short_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}

/// `CE-` followed by eight uppercase characters, printed on a CE certificate.
pub fn certificate_number() -> String {
    format!("CE-{}", short_code())
}

pub fn verification_code() -> String {
    short_code()
}
