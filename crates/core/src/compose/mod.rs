pub mod composer;
pub mod prompt;

pub use composer::{
    AnswerMarkers, ComposeError, ComposerSettings, FINAL_ANSWER, ResponseComposer, TWEET,
    extract_answer,
};
pub use prompt::PromptBuilder;
