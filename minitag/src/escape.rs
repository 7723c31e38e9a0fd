// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Entity escaping for character data and attribute values.

/// Escapes the five predefined XML entities.
///
/// The output is safe to embed both in character data and in single- or
/// double-quoted attribute values.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Resolves a single entity body (the part between `&` and `;`).
///
/// Accepts the five predefined entities as well as decimal (`#nnn`) and
/// hexadecimal (`#xhhh`) character references.
pub(crate) fn resolve_entity(body: &str) -> Option<char> {
    match body {
        "amp" => return Some('&'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "quot" => return Some('"'),
        "apos" => return Some('\''),
        _ => (),
    }
    let num = body.strip_prefix('#')?;
    let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        num.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

/// Undoes [`escape`], additionally resolving numeric character
/// references.
///
/// Returns `None` if an entity reference is unterminated or cannot be
/// resolved.
pub fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices();
    while let Some((start, c)) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let rest = &s[start + 1..];
        let end = rest.find(';')?;
        out.push(resolve_entity(&rest[..end])?);
        // Skip the entity body and the terminating semicolon.
        for _ in 0..end + 1 {
            chars.next();
        }
    }
    Some(out)
}
