use crate::config::Validation;
use crate::storage::page::IndexPage;

/// Hook run by the allocation tree before and after it mutates an index page.
pub trait Validator {
    fn check(&self, offset: u64, page: &IndexPage<'_>);
}

/// Panics on the first broken page invariant.
#[derive(Debug, Default, Clone, Copy)]
pub struct Assertions;

impl Validator for Assertions {
    fn check(&self, offset: u64, page: &IndexPage<'_>) {
        if let Err(violation) = page.check() {
            panic!("index page {} at {:#x}: {}", page, offset, violation);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unchecked;

impl Validator for Unchecked {
    fn check(&self, _offset: u64, _page: &IndexPage<'_>) {}
}

pub fn validator_for(validation: Validation) -> &'static dyn Validator {
    match validation {
        Validation::Assert => &Assertions,
        Validation::Off => &Unchecked,
    }
}
