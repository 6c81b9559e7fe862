use fatoora_relay_derive::Validate;

#[derive(Debug)]
pub struct FieldErrors(Vec<(&'static str, &'static str, String)>);

impl From<Vec<(&'static str, &'static str, String)>> for FieldErrors {
    fn from(issues: Vec<(&'static str, &'static str, String)>) -> Self {
        FieldErrors(issues)
    }
}

#[derive(Validate)]
#[validate_error(FieldErrors)]
pub struct Company {
    #[validate(non_empty, digits)]
    pub vat_number: String,
    #[validate(non_empty)]
    pub city: String,
    #[validate(non_empty)]
    pub business_category: String,
}

fn main() {
    let err = Company::new("".into(), " ".into(), "Retail".into())
        .err()
        .expect("two missing fields");
    let fields: Vec<_> = err.0.iter().map(|(field, _, _)| *field).collect();
    assert_eq!(fields, vec!["vat_number", "city"]);

    let err = Company::new("31x".into(), "Riyadh".into(), "Retail".into())
        .err()
        .expect("bad vat");
    assert_eq!(err.0[0].0, "vat_number");
    assert_eq!(err.0[0].1, "digits");
    assert_eq!(err.0[0].2, "must contain digits only");
}
