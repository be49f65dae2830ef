//! Error objects raised by the VM and surfaced to scripts.

use super::{ObjectHandle, ObjectKind, PropertyAttributes, Property, PropertyKey};
use crate::value::Value;
use crate::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    SyntaxError,
    RangeError,
    EvalError,
    UriError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::UriError => "URIError",
        }
    }
}

/// Builds a thrown error value. The `throw!` macro routes through here.
pub fn create_error(vm: &mut Vm, kind: ErrorKind, message: String) -> Value {
    kestrel_log::debug!("raise {}: {}", kind.name(), message);
    let _ = vm;

    let error = ObjectHandle::new(ObjectKind::Error {
        kind,
        message: message.clone().into(),
    });
    {
        let mut data = error.borrow_mut();
        let attrs = PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE;
        data.properties.insert(
            PropertyKey::from("name"),
            Property::with_attributes(Value::string(kind.name()), attrs),
        );
        data.properties.insert(
            PropertyKey::from("message"),
            Property::with_attributes(Value::string(message), attrs),
        );
    }
    Value::Object(error)
}

/// The error classification of a thrown value, if it is a VM-created error.
pub fn error_kind(value: &Value) -> Option<ErrorKind> {
    match value {
        Value::Object(o) => match o.borrow().kind {
            ObjectKind::Error { kind, .. } => Some(kind),
            _ => None,
        },
        _ => None,
    }
}
