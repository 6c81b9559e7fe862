use fatoora_relay_derive::Validate;

#[derive(Validate)]
#[validate(non_empty, no_special_chars)]
pub struct Subject {
    pub common_name: String,
    pub organization_unit_name: String,
}

fn main() {
    let s = Subject::new("ACME".into(), "Riyadh Branch".into());
    assert!(s.is_ok());

    let s = Subject::new("ACME".into(), "Riyadh|Branch".into());
    assert!(s.is_err());
}
