//! Prompt composition
//!
//! The question is sent first, followed by an instruction asking the
//! service to append a delimited JSON block. Services that ignore the
//! instruction are still handled by the fallback parser.

/// Opening delimiter of the structured block
pub const BLOCK_START: &str = "<<<PARLEY_JSON";

/// Closing delimiter of the structured block
pub const BLOCK_END: &str = "PARLEY_JSON>>>";

/// Build the text submitted to a service
pub fn compose_prompt(question: &str) -> String {
    format!(
        "{question}\n\n\
         After your answer, add a machine-readable recap between the lines \
         {BLOCK_START} and {BLOCK_END}. The recap must be a single JSON object \
         with these fields:\n\
         {{\"response\": \"<full answer>\", \
         \"summary\": \"one or two sentences\", \
         \"key_points\": [\"short independent claims\"], \
         \"confidence\": 0.0 to 1.0, \
         \"category\": \"technical | science | health | finance | legal | creative | education | general\"}}\n\
         Do not put anything else inside the delimiters.",
        question = question.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_comes_first() {
        let prompt = compose_prompt("  What is the boiling point of water?  ");
        assert!(prompt.starts_with("What is the boiling point of water?\n\n"));
    }

    #[test]
    fn test_instruction_names_delimiters_and_fields() {
        let prompt = compose_prompt("q");
        assert!(prompt.contains(BLOCK_START));
        assert!(prompt.contains(BLOCK_END));
        for field in ["response", "summary", "key_points", "confidence", "category"] {
            let quoted = format!("\"{}\"", field);
            assert!(prompt.contains(&quoted), "missing field {}", field);
        }
    }
}
