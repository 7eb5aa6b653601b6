pub mod answer;
pub mod choice;
pub mod common;
pub mod contract;
pub mod list;
pub mod question;
pub mod response;
pub mod survey;
pub mod user_context;

pub use answer::*;
pub use choice::*;
pub use common::*;
pub use contract::*;
pub use list::*;
pub use question::*;
pub use response::*;
pub use survey::*;
pub use user_context::*;

/// Every entity contract, used to resolve ownership between end-points.
pub static ALL_CONTRACTS: [&QueryContract; 5] = [
    &SURVEY_CONTRACT,
    &QUESTION_CONTRACT,
    &CHOICE_CONTRACT,
    &RESPONSE_CONTRACT,
    &ANSWER_CONTRACT,
];
