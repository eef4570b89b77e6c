// [libs/gateway/toolcall/src/assembler.rs]
//! Reassembles streaming tool-call fragments into complete calls
//! (§4.H `ToolCallAssembler`).

/// One chunk of a streamed tool-call, as providers typically emit them:
/// grouped by `index`, with `name`/`id` present only on the first chunk
/// for that index and `arguments_delta` accumulating across chunks.
#[derive(Debug, Clone, Default)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    pub arguments: Option<serde_json::Value>,
    pub parse_error: Option<String>,
}

#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments_buffer: String,
}

#[derive(Default)]
pub struct ToolCallAssembler {
    current_index: Option<u32>,
    pending: PendingCall,
    finalized: Vec<AssembledToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment. If it opens a new index while a previous one
    /// is still accumulating, the previous index is finalized first
    /// (§4.H "early-finalizes an earlier index when a later index begins").
    pub fn push_fragment(&mut self, fragment: ToolCallFragment) {
        if let Some(current) = self.current_index {
            if current != fragment.index {
                self.finalize_current();
            }
        }

        self.current_index = Some(fragment.index);
        if fragment.id.is_some() {
            self.pending.id = fragment.id;
        }
        if fragment.name.is_some() {
            self.pending.name = fragment.name;
        }
        self.pending.arguments_buffer.push_str(&fragment.arguments_delta);
    }

    fn finalize_current(&mut self) {
        let Some(index) = self.current_index.take() else {
            return;
        };
        let pending = std::mem::take(&mut self.pending);
        let (arguments, parse_error) = match parse_lenient_json(&pending.arguments_buffer) {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err.to_string())),
        };

        self.finalized.push(AssembledToolCall {
            index,
            id: pending.id.unwrap_or_default(),
            name: pending.name.unwrap_or_default(),
            raw_arguments: pending.arguments_buffer,
            arguments,
            parse_error,
        });
    }

    /// Finalizes any call still accumulating and returns every completed
    /// call in index order. A call whose arguments never parse is still
    /// emitted, carrying `parse_error` instead of `arguments`.
    pub fn finish(mut self) -> Vec<AssembledToolCall> {
        self.finalize_current();
        self.finalized.sort_by_key(|call| call.index);
        self.finalized
    }
}

/// `serde_json::from_str` with one concession: a single trailing comma
/// immediately before a closing `}` or `]` is stripped before parsing
/// (§4.H "lenient trailing-comma tolerance").
fn parse_lenient_json(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) => {
            let cleaned = strip_trailing_commas(raw);
            serde_json::from_str(&cleaned)
        }
    }
}

fn strip_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(index: u32, id: Option<&str>, name: Option<&str>, delta: &str) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments_delta: delta.to_string(),
        }
    }

    #[test]
    fn accumulates_deltas_for_a_single_index() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(frag(0, Some("call_1"), Some("search"), "{\"q\":"));
        assembler.push_fragment(frag(0, None, None, "\"rust\"}"));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, Some(serde_json::json!({"q": "rust"})));
    }

    #[test]
    fn a_new_index_finalizes_the_previous_one() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(frag(0, Some("call_1"), Some("search"), "{\"q\":\"rust\"}"));
        assembler.push_fragment(frag(1, Some("call_2"), Some("fetch"), "{\"url\":\"x\"}"));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[1].name, "fetch");
    }

    #[test]
    fn trailing_comma_is_tolerated() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(frag(0, Some("call_1"), Some("search"), "{\"q\":\"rust\",}"));

        let calls = assembler.finish();
        assert_eq!(calls[0].arguments, Some(serde_json::json!({"q": "rust"})));
        assert!(calls[0].parse_error.is_none());
    }

    #[test]
    fn unparseable_arguments_still_emit_the_call() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(frag(0, Some("call_1"), Some("search"), "{not json"));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.is_none());
        assert!(calls[0].parse_error.is_some());
    }
}
