//! Conversion between `ls`-style permission strings and numeric modes.

use inodb_core::FileMode;

const TYPE_CHARS: [(char, u32); 7] = [
    ('-', FileMode::REGULAR),
    ('d', FileMode::DIRECTORY),
    ('l', FileMode::SYMLINK),
    ('p', 0o010_000),
    ('c', 0o020_000),
    ('b', 0o060_000),
    ('s', 0o140_000),
];

/// Parse a ten character permission string such as `drwxrwsr-x`.
///
/// Returns `None` if the string is not exactly ten ASCII characters.
pub fn parse_mode(text: &str) -> Option<u32> {
    let bytes: [u8; 10] = text.as_bytes().try_into().ok()?;
    if !text.is_ascii() {
        return None;
    }

    let mut mode = TYPE_CHARS
        .iter()
        .find(|(c, _)| *c as u8 == bytes[0])
        .map_or(0, |(_, bits)| *bits);

    for (class, shift) in [(0usize, 6u32), (1, 3), (2, 0)] {
        let triple = &bytes[1 + class * 3..4 + class * 3];
        if triple[0] == b'r' {
            mode |= 0o4 << shift;
        }
        if triple[1] == b'w' {
            mode |= 0o2 << shift;
        }
        let special = match class {
            0 => FileMode::SET_UID,
            1 => FileMode::SET_GID,
            _ => FileMode::STICKY,
        };
        match triple[2] {
            b'x' => mode |= 0o1 << shift,
            b's' | b't' => mode |= special | (0o1 << shift),
            b'S' | b'T' => mode |= special,
            _ => {}
        }
    }

    Some(mode)
}

/// Render a numeric mode as a ten character permission string.
pub fn format_mode(mode: u32) -> String {
    let kind = mode & FileMode::TYPE_MASK;
    let type_char = TYPE_CHARS
        .iter()
        .find(|(_, bits)| *bits == kind)
        .map_or('?', |(c, _)| *c);

    let mut out = String::with_capacity(10);
    out.push(type_char);

    for (class, shift) in [(0usize, 6u32), (1, 3), (2, 0)] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });

        let (special, set, unset) = match class {
            0 => (FileMode::SET_UID, 's', 'S'),
            1 => (FileMode::SET_GID, 's', 'S'),
            _ => (FileMode::STICKY, 't', 'T'),
        };
        let exec = bits & 0o1 != 0;
        out.push(match (mode & special != 0, exec) {
            (true, true) => set,
            (true, false) => unset,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }

    out
}
