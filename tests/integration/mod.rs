mod controller_tests;
mod protocol_tests;
mod store_tests;
