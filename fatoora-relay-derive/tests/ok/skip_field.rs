use fatoora_relay_derive::Validate;

#[derive(Validate)]
#[validate(non_empty)]
pub struct Device {
    pub name: String,

    #[validate(skip)]
    pub counter: u64,
}

fn main() {
    let d = Device::new("POS-1".into(), 10);
    assert!(d.is_ok());
}
