use std::fmt::{self, Display, Formatter};
use std::io::{self, Error, ErrorKind};

/// A parsed field descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum JavaType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<JavaType>),
}

impl JavaType {
    pub fn parse(descriptor: &str) -> io::Result<Self> {
        let mut chars = descriptor.chars();
        let parsed = Self::parse_partial(&mut chars)?;

        match chars.next() {
            Some(_) => Err(Error::new(
                ErrorKind::InvalidData,
                format!("trailing characters in field descriptor: {}", descriptor),
            )),
            None => Ok(parsed),
        }
    }

    fn parse_partial(chars: &mut std::str::Chars<'_>) -> io::Result<Self> {
        Ok(match chars.next() {
            Some('B') => JavaType::Byte,
            Some('C') => JavaType::Char,
            Some('D') => JavaType::Double,
            Some('F') => JavaType::Float,
            Some('I') => JavaType::Int,
            Some('J') => JavaType::Long,
            Some('S') => JavaType::Short,
            Some('Z') => JavaType::Boolean,
            Some('[') => JavaType::Array(Box::new(Self::parse_partial(chars)?)),
            Some('L') => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(';') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::new(
                                ErrorKind::InvalidData,
                                "unterminated class name in descriptor",
                            ))
                        }
                    }
                }
                JavaType::Object(name)
            }
            x => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unexpected character in descriptor: {:?}", x),
                ))
            }
        })
    }

    /// Bytes this type occupies inside an object or static blob. References
    /// store a 4-byte indirection slot.
    pub fn data_size(&self) -> usize {
        match self {
            JavaType::Byte | JavaType::Boolean => 1,
            JavaType::Char | JavaType::Short => 2,
            JavaType::Int | JavaType::Float => 4,
            JavaType::Long | JavaType::Double => 8,
            JavaType::Object(_) | JavaType::Array(_) => 4,
        }
    }

    /// Operand stack cells this type occupies (category 2 types take two).
    pub fn cells(&self) -> u16 {
        match self {
            JavaType::Long | JavaType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_) | JavaType::Array(_))
    }

    /// The internal class name this type loads as (`java/lang/String`, `[I`,
    /// or a single-character primitive name).
    pub fn class_name(&self) -> String {
        match self {
            JavaType::Object(name) => name.clone(),
            _ => self.to_string(),
        }
    }
}

impl Display for JavaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Byte => write!(f, "B"),
            JavaType::Char => write!(f, "C"),
            JavaType::Double => write!(f, "D"),
            JavaType::Float => write!(f, "F"),
            JavaType::Int => write!(f, "I"),
            JavaType::Long => write!(f, "J"),
            JavaType::Short => write!(f, "S"),
            JavaType::Boolean => write!(f, "Z"),
            JavaType::Object(name) => write!(f, "L{};", name),
            JavaType::Array(element) => write!(f, "[{}", element),
        }
    }
}

/// A parsed method descriptor such as `([Ljava/lang/String;)V`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MethodDescriptor {
    pub parameters: Vec<JavaType>,
    pub returns: Option<JavaType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> io::Result<Self> {
        let mut chars = descriptor.chars();
        if chars.next() != Some('(') {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("method descriptor must begin with '(': {}", descriptor),
            ));
        }

        let mut parameters = Vec::new();
        let mut peek = chars.clone();
        while peek.next() != Some(')') {
            parameters.push(JavaType::parse_partial(&mut chars)?);
            peek = chars.clone();
        }
        chars.next();

        let returns = match chars.clone().next() {
            Some('V') => {
                chars.next();
                None
            }
            Some(_) => Some(JavaType::parse_partial(&mut chars)?),
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("method descriptor has no return type: {}", descriptor),
                ))
            }
        };

        match chars.next() {
            Some(_) => Err(Error::new(
                ErrorKind::InvalidData,
                format!("trailing characters in method descriptor: {}", descriptor),
            )),
            None => Ok(MethodDescriptor {
                parameters,
                returns,
            }),
        }
    }

    /// Operand cells consumed by a call. Long and double parameters count as
    /// two; non-static methods add one for the receiver.
    pub fn parameter_cells(&self, is_static: bool) -> u16 {
        let cells: u16 = self.parameters.iter().map(JavaType::cells).sum();
        if is_static {
            cells
        } else {
            cells + 1
        }
    }
}
