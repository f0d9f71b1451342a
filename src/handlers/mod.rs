// Route handlers. Each one maps a request to data access calls and answers
// with exactly one envelope.
pub mod system;
pub mod users;
