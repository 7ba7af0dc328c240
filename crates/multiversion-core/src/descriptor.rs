//! JVM type and method descriptor helpers.
//!
//! Only what the merge and split passes need: splitting a method descriptor
//! into parameters and return type, and picking out object types.

use crate::ident::ClassIdentity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("`{0}` is not a method descriptor")]
    NotAMethod(String),
    #[error("malformed descriptor `{desc}` at offset {offset}")]
    Malformed { desc: String, offset: usize },
}

pub fn is_method(desc: &str) -> bool {
    desc.starts_with('(')
}

/// `(ILjava/lang/String;)J` -> `("ILjava/lang/String;", "J")`.
pub fn split_method(desc: &str) -> Result<(&str, &str), DescriptorError> {
    let rest = desc
        .strip_prefix('(')
        .ok_or_else(|| DescriptorError::NotAMethod(desc.to_string()))?;
    let close = rest
        .find(')')
        .ok_or_else(|| DescriptorError::NotAMethod(desc.to_string()))?;
    Ok((&rest[..close], &rest[close + 1..]))
}

/// The parenthesised parameter part of a method descriptor, or the whole
/// descriptor for anything else.
pub fn parameter_part(desc: &str) -> &str {
    match desc.find(')') {
        Some(close) if is_method(desc) => &desc[..=close],
        _ => desc,
    }
}

pub fn return_type(desc: &str) -> Result<&str, DescriptorError> {
    split_method(desc).map(|(_, ret)| ret)
}

pub fn returns_void(desc: &str) -> bool {
    matches!(return_type(desc), Ok("V"))
}

/// Parse the parameter list of a method descriptor into individual field
/// descriptors.
pub fn parameter_types(desc: &str) -> Result<Vec<&str>, DescriptorError> {
    let (params, _) = split_method(desc)?;
    let bytes = params.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
            if i >= bytes.len() {
                return Err(malformed(desc, start));
            }
        }
        match bytes[i] {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => i += 1,
            b'L' => match params[i..].find(';') {
                Some(end) => i += end + 1,
                None => return Err(malformed(desc, i)),
            },
            _ => return Err(malformed(desc, i)),
        }
        out.push(&params[start..i]);
    }
    Ok(out)
}

fn malformed(desc: &str, offset: usize) -> DescriptorError {
    DescriptorError::Malformed {
        desc: desc.to_string(),
        // +1 for the opening parenthesis stripped by split_method
        offset: offset + 1,
    }
}

/// `Lcom/example/ClassA;` -> `com/example/ClassA`. Arrays and primitives
/// yield `None`.
pub fn object_type(field_desc: &str) -> Option<ClassIdentity> {
    field_desc
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .map(ClassIdentity::new)
}

/// Element class of an object or array-of-object descriptor.
pub fn element_class(field_desc: &str) -> Option<ClassIdentity> {
    object_type(field_desc.trim_start_matches('['))
}

/// Every class named anywhere in a field or method descriptor.
pub fn referenced_classes(desc: &str) -> Vec<ClassIdentity> {
    let mut out = Vec::new();
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        match rest[start..].find(';') {
            Some(end) => {
                out.push(ClassIdentity::new(&rest[start + 1..start + end]));
                rest = &rest[start + end + 1..];
            }
            None => break,
        }
    }
    out
}

/// Rewrite every class named in a field or method descriptor through `map`.
/// `None` when nothing was renamed.
pub fn map_classes<F>(desc: &str, mut map: F) -> Option<String>
where
    F: FnMut(&ClassIdentity) -> Option<ClassIdentity>,
{
    let mut out = String::with_capacity(desc.len());
    let mut changed = false;
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        let Some(len) = rest[start..].find(';') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        out.push_str(&rest[..=start]);
        match map(&ClassIdentity::new(name)) {
            Some(mapped) => {
                out.push_str(mapped.as_str());
                changed = true;
            }
            None => out.push_str(name),
        }
        out.push(';');
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    changed.then_some(out)
}

/// Drop the first parameter of a method descriptor. Used when a static
/// helper takes the receiver as its first argument.
pub fn without_first_parameter(desc: &str) -> Result<String, DescriptorError> {
    let params = parameter_types(desc)?;
    let ret = return_type(desc)?;
    Ok(format!("({}){}", params.iter().skip(1).copied().collect::<String>(), ret))
}
