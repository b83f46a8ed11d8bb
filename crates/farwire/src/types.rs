//! Core types for the farwire frame format.

/// The eight message kinds that cross the wire.
///
/// Requests flow client to executor (EVAL, STORE, STOREPKG, CALL, QUIT);
/// responses flow back (RETURNED, OK, DIED). Opcodes are transmitted as
/// their literal names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Eval,
    Store,
    StorePkg,
    Call,
    Quit,
    Returned,
    Ok,
    Died,
}

impl Opcode {
    pub const fn token(self) -> &'static [u8] {
        match self {
            Opcode::Eval => b"EVAL",
            Opcode::Store => b"STORE",
            Opcode::StorePkg => b"STOREPKG",
            Opcode::Call => b"CALL",
            Opcode::Quit => b"QUIT",
            Opcode::Returned => b"RETURNED",
            Opcode::Ok => b"OK",
            Opcode::Died => b"DIED",
        }
    }

    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"EVAL" => Some(Opcode::Eval),
            b"STORE" => Some(Opcode::Store),
            b"STOREPKG" => Some(Opcode::StorePkg),
            b"CALL" => Some(Opcode::Call),
            b"QUIT" => Some(Opcode::Quit),
            b"RETURNED" => Some(Opcode::Returned),
            b"OK" => Some(Opcode::Ok),
            b"DIED" => Some(Opcode::Died),
            _ => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are fixed ASCII.
        write!(f, "{}", std::str::from_utf8(self.token()).unwrap_or("?"))
    }
}

/// One framed message: an opcode token plus positional byte-string
/// arguments.
///
/// The token is kept raw so that a well-framed message with an unknown
/// opcode still decodes and consumes its bytes; what to do with it is a
/// dispatch decision, not a framing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    op: Vec<u8>,
    args: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(op: Opcode, args: Vec<Vec<u8>>) -> Self {
        Self {
            op: op.token().to_vec(),
            args,
        }
    }

    /// A message with an arbitrary opcode token, known or not.
    pub fn raw(op: impl Into<Vec<u8>>, args: Vec<Vec<u8>>) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }

    /// `None` for tokens outside the known opcode table.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_token(&self.op)
    }

    pub fn token(&self) -> &[u8] {
        &self.op
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The buffer is a strict prefix of a valid frame; feed more bytes and
    /// retry.
    Incomplete,
    /// The opcode line was empty.
    EmptyOpcode,
    /// An argument-count line completed as something other than a plain
    /// decimal.
    BadCount(Vec<u8>),
    /// A byte-length line completed as something other than a plain
    /// decimal.
    BadLength(Vec<u8>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "frame incomplete, more bytes needed"),
            Self::EmptyOpcode => write!(f, "empty opcode line"),
            Self::BadCount(line) => {
                write!(f, "argument count is not a decimal: {:?}", String::from_utf8_lossy(line))
            }
            Self::BadLength(line) => {
                write!(f, "byte length is not a decimal: {:?}", String::from_utf8_lossy(line))
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Connection preamble, written once by the client before any frame.
///
/// The executor consumes and verifies it before entering its dispatch loop;
/// a mismatch is fatal to the connection. Build-time constant, never user
/// data.
pub const BOOTSTRAP: &[u8] = b"farrun/1\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_tokens_round_trip() {
        let all = [
            Opcode::Eval,
            Opcode::Store,
            Opcode::StorePkg,
            Opcode::Call,
            Opcode::Quit,
            Opcode::Returned,
            Opcode::Ok,
            Opcode::Died,
        ];
        for op in all {
            assert_eq!(Opcode::from_token(op.token()), Some(op));
        }
        assert_eq!(Opcode::from_token(b"eval"), None);
        assert_eq!(Opcode::from_token(b""), None);
    }

    #[test]
    fn unknown_token_has_no_opcode() {
        let msg = Message::raw(&b"BLORT"[..], vec![]);
        assert_eq!(msg.opcode(), None);
        assert_eq!(msg.token(), b"BLORT");
    }
}
