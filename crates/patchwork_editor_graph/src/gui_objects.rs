// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message behavior of the editable GUI objects.
//!
//! These types hold the editor-side state of toggles and message boxes and
//! decide what goes out of their outlet. Sending itself happens through the
//! canvas, under the engine lock.

use crate::engine::{Atom, Message};

/// Longest symbol a message box displays
const MAX_SYMBOL_LEN: usize = 39;

/// `[tgl]` state
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle {
    /// Current output value; zero means off
    pub value: f32,
    /// Value sent when switching on
    pub nonzero: f32,
}

impl Default for Toggle {
    fn default() -> Self {
        Self {
            value: 0.0,
            nonzero: 1.0,
        }
    }
}

impl Toggle {
    /// Whether the toggle shows as on
    pub fn is_on(&self) -> bool {
        self.value.abs() > f32::EPSILON
    }

    /// Flip the toggle from a click; returns the message to send
    pub fn click(&mut self) -> Message {
        self.value = if self.is_on() { 0.0 } else { self.nonzero };
        Message::float(self.value)
    }

    /// Handle a message arriving from the engine. Only updates the display
    /// state; nothing is sent back out.
    pub fn receive(&mut self, message: &Message) {
        match (message.selector.as_str(), message.args.first()) {
            ("bang", _) => {
                self.value = if self.is_on() { 0.0 } else { self.nonzero };
            }
            ("float" | "set", Some(Atom::Float(v))) => self.value = *v,
            ("nonzero", Some(Atom::Float(v))) if v.abs() > f32::EPSILON => self.nonzero = *v,
            _ => tracing::debug!(selector = %message.selector, "toggle ignored message"),
        }
    }
}

/// Message box contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBox {
    /// Text as typed
    pub text: String,
}

impl MessageBox {
    /// Create a message box
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Split the text into atoms
    pub fn atoms(&self) -> Vec<Atom> {
        parse_atoms(&self.text)
    }

    /// Message the box sends when clicked, `None` when empty
    pub fn message(&self) -> Option<Message> {
        let mut atoms = self.atoms();
        match atoms.first() {
            None => None,
            Some(Atom::Symbol(_)) => {
                let Atom::Symbol(selector) = atoms.remove(0) else {
                    return None;
                };
                Some(Message::new(selector, atoms))
            }
            Some(Atom::Float(_)) => {
                let selector = if atoms.len() == 1 { "float" } else { "list" };
                Some(Message::new(selector, atoms))
            }
        }
    }

    /// Handle a message arriving from the engine; returns the message to
    /// send out when the box is triggered. Data messages trigger the box
    /// without argument substitution.
    pub fn receive(&mut self, message: &Message) -> Option<Message> {
        match message.selector.as_str() {
            "set" => {
                self.text = atoms_to_text(&message.args);
                None
            }
            "append" => {
                let appended = atoms_to_text(&message.args);
                if self.text.is_empty() {
                    self.text = appended;
                } else if !appended.is_empty() {
                    self.text.push(' ');
                    self.text.push_str(&appended);
                }
                None
            }
            "bang" | "float" | "symbol" | "list" => self.message(),
            other => {
                tracing::debug!(selector = other, "message box ignored message");
                None
            }
        }
    }
}

fn looks_numeric(word: &str) -> bool {
    word != "-" && word.chars().all(|c| "0123456789e.-+".contains(c))
}

/// Tokenize message text: numeric words become floats, everything else a
/// symbol
pub fn parse_atoms(text: &str) -> Vec<Atom> {
    text.split_whitespace()
        .map(|word| match word.parse::<f32>() {
            Ok(v) if looks_numeric(word) => Atom::Float(v),
            _ => Atom::Symbol(word.to_string()),
        })
        .collect()
}

/// Render atoms back to message box text. Special characters in symbols are
/// escaped and a symbol ending in `;` ends the line.
pub fn atoms_to_text(atoms: &[Atom]) -> String {
    let mut text = String::new();
    for atom in atoms {
        match atom {
            Atom::Float(v) => {
                text.push_str(&v.to_string());
                text.push(' ');
            }
            Atom::Symbol(sym) => {
                let mut escaped = String::new();
                for c in sym.chars() {
                    let needed = if matches!(c, '\\' | '[' | '$' | ';') { 2 } else { 1 };
                    if escaped.chars().count() + needed > MAX_SYMBOL_LEN {
                        break;
                    }
                    if needed == 2 {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                text.push_str(&escaped);
                text.push(if sym.ends_with(';') { '\n' } else { ' ' });
            }
        }
    }
    text.trim_end().to_string()
}
