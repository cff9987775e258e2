use uuid::Uuid;

/// A fresh `xs:ID`: must not start with a digit, so the uuid gets a prefix
#[must_use]
pub fn request_id() -> String {
	format!("id{}", Uuid::new_v4().simple())
}
