/// Descriptor line tokenizer

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Space,
    Word,
    Quoted,
    Escape,
    QuotedEscape,
}

/// Split a line into words.
///
/// Double quotes group, backslash escapes the next character both inside and
/// outside quotes. Returns `None` for a line that ends inside a quote or
/// right after a backslash.
pub fn split_words(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut buf = String::new();
    let mut state = State::Space;

    for c in line.chars() {
        state = match state {
            State::Space if c.is_whitespace() => State::Space,
            State::Space | State::Word => match c {
                '"' => State::Quoted,
                '\\' => State::Escape,
                c if c.is_whitespace() => {
                    words.push(std::mem::take(&mut buf));
                    State::Space
                }
                c => {
                    buf.push(c);
                    State::Word
                }
            },
            State::Quoted => match c {
                '"' => State::Word,
                '\\' => State::QuotedEscape,
                c => {
                    buf.push(c);
                    State::Quoted
                }
            },
            State::Escape => {
                buf.push(c);
                State::Word
            }
            State::QuotedEscape => {
                buf.push(c);
                State::Quoted
            }
        };
    }

    match state {
        State::Space => Some(words),
        State::Word => {
            words.push(buf);
            Some(words)
        }
        State::Quoted | State::Escape | State::QuotedEscape => None,
    }
}
