// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;

/// Identifies a logical sample source: a path relative to the pool's root
/// directory and whether the file is played reversed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    filename: String,
    reversed: bool,
}

impl FileId {
    /// Creates a new identity. Backslash separators are normalized to `/`.
    pub fn new<S: Into<String>>(filename: S, reversed: bool) -> FileId {
        let filename = filename.into();
        let filename = if filename.contains('\\') {
            filename.replace('\\', "/")
        } else {
            filename
        };
        FileId { filename, reversed }
    }

    /// Returns the path of the file relative to the root directory.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Returns true if the file is read last frame first.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reversed {
            write!(f, "{} (reversed)", self.filename)
        } else {
            write!(f, "{}", self.filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_equality_includes_direction() {
        let forward = FileId::new("kick.wav", false);
        let reversed = FileId::new("kick.wav", true);
        assert_ne!(forward, reversed);
        assert_eq!(forward, FileId::new("kick.wav", false));

        let mut set = HashSet::new();
        set.insert(forward.clone());
        set.insert(reversed);
        set.insert(forward);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_separators_normalized() {
        let id = FileId::new(r"drums\snare\hit.wav", false);
        assert_eq!(id.filename(), "drums/snare/hit.wav");
        assert_eq!(id, FileId::new("drums/snare/hit.wav", false));
    }

    #[test]
    fn test_display() {
        assert_eq!(FileId::new("a.wav", false).to_string(), "a.wav");
        assert_eq!(FileId::new("a.wav", true).to_string(), "a.wav (reversed)");
    }
}
