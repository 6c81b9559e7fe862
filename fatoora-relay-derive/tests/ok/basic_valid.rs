use fatoora_relay_derive::Validate;

#[derive(Validate)]
pub struct Branch {
    pub name: String,
    #[validate(is_country_code)]
    pub country: String,
}

fn main() {
    let ok = Branch::new("Riyadh HQ".into(), "SA".into());
    assert!(ok.is_ok());

    let bad = Branch::new("Riyadh HQ".into(), "sau".into());
    assert!(bad.is_err());
}
