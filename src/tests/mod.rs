pub mod support;

pub mod address_tests;
pub mod dispatcher_tests;
pub mod policy_tests;
pub mod read_through_tests;
