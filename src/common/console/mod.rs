// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Console services: the cvar registry, the command registry, and the
//! scrollback text buffer with its notify overlay.

use std::{
    cell::{Ref, RefCell},
    collections::HashMap,
    rc::Rc,
};

use crate::common::parse;

use chrono::Duration;
use thiserror::Error;

/// Total character cells in the scrollback ring.
pub const TEXT_SIZE: usize = 131072;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("{0}")]
    CmdError(String),
    #[error("Could not parse cvar as a number: {name} = \"{value}\"")]
    CvarParseFailed { name: String, value: String },
    #[error("Command already registered: {0}")]
    DuplicateCommand(String),
    #[error("Cvar already registered: {0}")]
    DuplicateCvar(String),
    #[error("No such command: {0}")]
    NoSuchCommand(String),
    #[error("No such cvar: {0}")]
    NoSuchCvar(String),
    #[error("{0} is write protected")]
    CvarWriteProtected(String),
}

bitflags! {
    /// Behavioral flags attached to a cvar at registration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        /// Persisted to the config file by the external config writer.
        const ARCHIVE = 1 << 0;
        /// Mirrored into the userinfo string sent to servers.
        const USERINFO = 1 << 1;
        /// Mirrored into the serverinfo string.
        const SERVERINFO = 1 << 2;
        /// Rejects all runtime writes.
        const NOSET = 1 << 3;
        /// Writes are deferred until the next map load.
        const LATCH = 1 << 4;
    }
}

type Cmd = Box<dyn Fn(&[&str]) -> String>;

/// Stores console commands.
pub struct CmdRegistry {
    cmds: HashMap<String, Cmd>,
}

impl CmdRegistry {
    pub fn new() -> CmdRegistry {
        CmdRegistry {
            cmds: HashMap::new(),
        }
    }

    /// Registers a new command with the given name.
    ///
    /// Returns an error if a command with the specified name already exists.
    pub fn insert<S>(&mut self, name: S, cmd: Cmd) -> Result<(), ConsoleError>
    where
        S: AsRef<str>,
    {
        let name = name.as_ref();
        match self.cmds.get(name) {
            Some(_) => return Err(ConsoleError::DuplicateCommand(name.to_owned())),
            None => {
                self.cmds.insert(name.to_owned(), cmd);
            }
        }

        Ok(())
    }

    /// Removes the command with the given name.
    ///
    /// Returns an error if there was no command with that name.
    pub fn remove<S>(&mut self, name: S) -> Result<(), ConsoleError>
    where
        S: AsRef<str>,
    {
        match self.cmds.remove(name.as_ref()) {
            Some(_) => Ok(()),
            None => Err(ConsoleError::NoSuchCommand(name.as_ref().to_string())),
        }
    }

    /// Executes a command.
    ///
    /// Returns an error if no command with the specified name exists.
    pub fn exec<S>(&mut self, name: S, args: &[&str]) -> Result<String, ConsoleError>
    where
        S: AsRef<str>,
    {
        let cmd = self
            .cmds
            .get(name.as_ref())
            .ok_or_else(|| ConsoleError::NoSuchCommand(name.as_ref().to_string()))?;

        Ok(cmd(args))
    }

    pub fn contains<S>(&self, name: S) -> bool
    where
        S: AsRef<str>,
    {
        self.cmds.contains_key(name.as_ref())
    }
}

impl Default for CmdRegistry {
    fn default() -> Self {
        CmdRegistry::new()
    }
}

struct Cvar {
    val: String,
    default: String,
    flags: CvarFlags,

    // pending value of a latched cvar, applied at the next map load
    latched: Option<String>,

    // set on every successful write, cleared by `clear_modified`
    modified: bool,
}

/// The keyed configuration store backing the entire cvar surface.
pub struct CvarRegistry {
    cvars: RefCell<HashMap<String, Cvar>>,
}

impl CvarRegistry {
    pub fn new() -> CvarRegistry {
        CvarRegistry {
            cvars: RefCell::new(HashMap::new()),
        }
    }

    /// Register a new cvar with the given name, default value and flags.
    pub fn register<S>(&self, name: S, default: S, flags: CvarFlags) -> Result<(), ConsoleError>
    where
        S: AsRef<str>,
    {
        let name = name.as_ref();
        let default = default.as_ref();

        let mut cvars = self.cvars.borrow_mut();
        match cvars.get(name) {
            Some(_) => return Err(ConsoleError::DuplicateCvar(name.to_owned())),
            None => {
                cvars.insert(
                    name.to_owned(),
                    Cvar {
                        val: default.to_owned(),
                        default: default.to_owned(),
                        flags,
                        latched: None,
                        modified: false,
                    },
                );
            }
        }

        Ok(())
    }

    pub fn get<S>(&self, name: S) -> Result<String, ConsoleError>
    where
        S: AsRef<str>,
    {
        Ok(self
            .cvars
            .borrow()
            .get(name.as_ref())
            .ok_or_else(|| ConsoleError::NoSuchCvar(name.as_ref().to_owned()))?
            .val
            .clone())
    }

    /// Returns the cvar's value parsed as `f32`.
    ///
    /// A value that fails to parse is reset to the cvar's default before
    /// parsing is retried; registration guarantees defaults are numeric for
    /// every cvar read this way.
    pub fn get_value<S>(&self, name: S) -> Result<f32, ConsoleError>
    where
        S: AsRef<str>,
    {
        let name = name.as_ref();
        let mut cvars = self.cvars.borrow_mut();
        let cvar = cvars
            .get_mut(name)
            .ok_or_else(|| ConsoleError::NoSuchCvar(name.to_owned()))?;

        let val_string = cvar.val.clone();
        let val = match val_string.parse::<f32>() {
            Ok(v) => Ok(v),
            Err(_) => {
                cvar.val = cvar.default.clone();
                cvar.val.parse::<f32>()
            }
        }
        .map_err(|_| ConsoleError::CvarParseFailed {
            name: name.to_owned(),
            value: val_string.clone(),
        })?;

        Ok(val)
    }

    /// Convenience wrapper for boolean-style cvars: nonzero is `true`.
    pub fn get_bool<S>(&self, name: S) -> Result<bool, ConsoleError>
    where
        S: AsRef<str>,
    {
        Ok(self.get_value(name)? != 0.0)
    }

    /// Writes a cvar.
    ///
    /// `NOSET` cvars reject the write. `LATCH` cvars stash the value; it
    /// takes effect at the next call to `apply_latched`.
    pub fn set<S>(&self, name: S, value: S) -> Result<(), ConsoleError>
    where
        S: AsRef<str>,
    {
        let name = name.as_ref();
        let value = value.as_ref();
        trace!("cvar assignment: {} {}", name, value);

        let mut cvars = self.cvars.borrow_mut();
        let cvar = cvars
            .get_mut(name)
            .ok_or_else(|| ConsoleError::NoSuchCvar(name.to_owned()))?;

        if cvar.flags.contains(CvarFlags::NOSET) {
            return Err(ConsoleError::CvarWriteProtected(name.to_owned()));
        }

        if cvar.flags.contains(CvarFlags::LATCH) {
            if cvar.val != value {
                cvar.latched = Some(value.to_owned());
            }
            return Ok(());
        }

        if cvar.val != value {
            cvar.val = value.to_owned();
            cvar.modified = true;
        }

        Ok(())
    }

    /// Promotes all latched values, at a map-load boundary.
    pub fn apply_latched(&self) {
        for cvar in self.cvars.borrow_mut().values_mut() {
            if let Some(latched) = cvar.latched.take() {
                cvar.val = latched;
                cvar.modified = true;
            }
        }
    }

    /// Returns whether the named cvar was written since the last
    /// `clear_modified`, clearing the mark.
    pub fn clear_modified<S>(&self, name: S) -> Result<bool, ConsoleError>
    where
        S: AsRef<str>,
    {
        let mut cvars = self.cvars.borrow_mut();
        let cvar = cvars
            .get_mut(name.as_ref())
            .ok_or_else(|| ConsoleError::NoSuchCvar(name.as_ref().to_owned()))?;
        let was = cvar.modified;
        cvar.modified = false;
        Ok(was)
    }

    pub fn contains<S>(&self, name: S) -> bool
    where
        S: AsRef<str>,
    {
        self.cvars.borrow().contains_key(name.as_ref())
    }
}

impl Default for CvarRegistry {
    fn default() -> Self {
        CvarRegistry::new()
    }
}

/// Scrollback text storage.
///
/// A fixed pool of character cells is divided into lines of `linewidth`
/// cells; the line index wraps, so the oldest lines are overwritten as new
/// text arrives. Each line remembers when it was last written to so the
/// notify overlay can pick out recent arrivals.
pub struct ConsoleText {
    cells: Vec<char>,
    linewidth: usize,
    totallines: usize,

    // line currently being written (monotonic; cells index is current % totallines)
    current: usize,

    // column position within the current line
    x: usize,

    // per-line timestamp of last write, indexed like `cells` lines
    times: Vec<Option<Duration>>,
}

impl ConsoleText {
    pub fn new(linewidth: usize) -> ConsoleText {
        assert!(linewidth > 0 && linewidth <= TEXT_SIZE);
        let totallines = TEXT_SIZE / linewidth;

        ConsoleText {
            cells: vec![' '; TEXT_SIZE],
            linewidth,
            totallines,
            current: 0,
            x: 0,
            times: vec![None; totallines],
        }
    }

    pub fn linewidth(&self) -> usize {
        self.linewidth
    }

    pub fn totallines(&self) -> usize {
        self.totallines
    }

    pub fn current(&self) -> usize {
        self.current
    }

    fn line_start(&self, line: usize) -> usize {
        (line % self.totallines) * self.linewidth
    }

    /// Returns the cells of an absolute line index.
    pub fn line(&self, line: usize) -> &[char] {
        let start = self.line_start(line);
        &self.cells[start..start + self.linewidth]
    }

    fn advance_line(&mut self, now: Duration) {
        self.x = 0;
        self.current += 1;
        let start = self.line_start(self.current);
        for c in &mut self.cells[start..start + self.linewidth] {
            *c = ' ';
        }
        let idx = self.current % self.totallines;
        self.times[idx] = Some(now);
    }

    /// Appends text, word-wrapping at `linewidth` and stamping each touched
    /// line with `now`.
    pub fn print(&mut self, text: &str, now: Duration) {
        for word in split_keeping_breaks(text) {
            match word {
                Chunk::Newline => self.advance_line(now),
                Chunk::Word(w) => {
                    // wrap if the word won't fit on this line
                    if self.x + w.chars().count() > self.linewidth && self.x != 0 {
                        self.advance_line(now);
                    }

                    for c in w.chars() {
                        if self.x == self.linewidth {
                            self.advance_line(now);
                        }
                        let start = self.line_start(self.current);
                        self.cells[start + self.x] = c;
                        self.x += 1;
                    }

                    let idx = self.current % self.totallines;
                    self.times[idx] = Some(now);
                }
            }
        }
    }

    /// Reflows the scrollback into a new line width.
    ///
    /// Existing lines are copied back into the ring at the new width; content
    /// older than the new capacity is lost.
    pub fn resize(&mut self, linewidth: usize) {
        if linewidth == self.linewidth {
            return;
        }

        let old = std::mem::replace(self, ConsoleText::new(linewidth));

        let numlines = old.totallines.min(self.totallines).min(old.current + 1);
        let numchars = old.linewidth.min(self.linewidth);

        // oldest first so the new ring ends on the old current line
        for i in (0..numlines).rev() {
            let src_line = old.current - i;
            let src = old.line(src_line);

            self.x = 0;
            let dst_start = self.line_start(self.current);
            self.cells[dst_start..dst_start + numchars].copy_from_slice(&src[..numchars]);
            self.times[self.current % self.totallines] = old.times[src_line % old.totallines];

            if i > 0 {
                self.current += 1;
                let start = self.line_start(self.current);
                for c in &mut self.cells[start..start + self.linewidth] {
                    *c = ' ';
                }
            }
        }

        // restore the column cursor as far as the copy allows
        self.x = old.x.min(numchars);
    }

    /// Lines written within `notify_time` of `now`, oldest first.
    pub fn notify_lines(&self, now: Duration, notify_time: Duration) -> Vec<&[char]> {
        let earliest = self.current.saturating_sub(self.totallines - 1);
        (earliest..=self.current)
            .filter(|&line| match self.times[line % self.totallines] {
                Some(stamp) => now - stamp < notify_time,
                None => false,
            })
            .map(|line| self.line(line))
            .collect()
    }

    /// Whether the input cursor is in the visible phase of its blink.
    pub fn cursor_visible(realtime_millis: i64) -> bool {
        (realtime_millis >> 8) & 1 == 1
    }
}

/// The line of text currently being edited in the console.
pub struct ConsoleInput {
    text: Vec<char>,
    curs: usize,
}

impl ConsoleInput {
    pub fn new() -> ConsoleInput {
        ConsoleInput {
            text: Vec::new(),
            curs: 0,
        }
    }

    pub fn get_text(&self) -> Vec<char> {
        self.text.to_owned()
    }

    pub fn set_text(&mut self, text: &[char]) {
        self.text = text.to_vec();
        self.curs = self.text.len();
    }

    pub fn insert(&mut self, c: char) {
        self.text.insert(self.curs, c);
        self.cursor_right();
    }

    pub fn cursor_right(&mut self) {
        if self.curs < self.text.len() {
            self.curs += 1;
        }
    }

    pub fn cursor_left(&mut self) {
        if self.curs > 0 {
            self.curs -= 1;
        }
    }

    pub fn delete(&mut self) {
        if self.curs < self.text.len() {
            self.text.remove(self.curs);
        }
    }

    pub fn backspace(&mut self) {
        if self.curs > 0 {
            self.text.remove(self.curs - 1);
            self.curs -= 1;
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.curs = 0;
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        ConsoleInput::new()
    }
}

/// The console proper: input line, scrollback, and execution buffer.
pub struct Console {
    cmds: Rc<RefCell<CmdRegistry>>,
    cvars: Rc<RefCell<CvarRegistry>>,

    input: ConsoleInput,
    buffer: RefCell<String>,
    text: RefCell<ConsoleText>,

    // client time of the last print, for notify stamping
    now: RefCell<Duration>,
}

impl Console {
    pub fn new(
        cmds: Rc<RefCell<CmdRegistry>>,
        cvars: Rc<RefCell<CvarRegistry>>,
        linewidth: usize,
    ) -> Console {
        Console {
            cmds,
            cvars,
            input: ConsoleInput::new(),
            buffer: RefCell::new(String::new()),
            text: RefCell::new(ConsoleText::new(linewidth)),
            now: RefCell::new(Duration::zero()),
        }
    }

    /// Advances the console's notion of client time, used to stamp lines.
    pub fn set_time(&self, now: Duration) {
        *self.now.borrow_mut() = now;
    }

    pub fn print<S>(&self, s: S)
    where
        S: AsRef<str>,
    {
        let now = *self.now.borrow();
        self.text.borrow_mut().print(s.as_ref(), now);
    }

    pub fn println<S>(&self, s: S)
    where
        S: AsRef<str>,
    {
        self.print(s);
        self.print("\n");
    }

    /// Reflows the scrollback for a new viewport width in character cells.
    pub fn check_resize(&self, linewidth: usize) {
        self.text.borrow_mut().resize(linewidth);
    }

    pub fn text(&self) -> Ref<ConsoleText> {
        self.text.borrow()
    }

    pub fn send_char(&mut self, c: char) {
        match c {
            // ignore grave and escape keys
            '`' | '\x1b' => (),

            '\r' => {
                let mut entered: String = self.input.get_text().into_iter().collect();
                entered.push('\n');
                self.buffer.borrow_mut().push_str(&entered);

                // echo the input to the scrollback
                let echo: String = std::iter::once(']')
                    .chain(self.input.get_text())
                    .collect();
                self.println(echo);

                self.input.clear();
            }

            '\x08' => self.input.backspace(),
            '\x7f' => self.input.delete(),

            c => self.input.insert(c),
        }
    }

    pub fn cursor(&self) -> usize {
        self.input.curs
    }

    pub fn input_text(&self) -> Vec<char> {
        self.input.get_text()
    }

    pub fn stuff_text<S>(&self, text: S)
    where
        S: AsRef<str>,
    {
        self.buffer.borrow_mut().push_str(text.as_ref());
        self.buffer.borrow_mut().push('\n');
    }

    /// Interprets the contents of the execution buffer.
    pub fn execute(&self) {
        let text = self.buffer.replace(String::new());

        for args in parse::commands(&text) {
            let Some(arg_0) = args.first() else {
                continue;
            };

            let tail_args: Vec<&str> = args.iter().map(|s| s.as_ref()).skip(1).collect();

            if self.cmds.borrow().contains(arg_0) {
                match self.cmds.borrow_mut().exec(arg_0, &tail_args) {
                    Ok(o) => {
                        if !o.is_empty() {
                            self.println(o)
                        }
                    }
                    Err(e) => self.println(format!("{}", e)),
                }
            } else if self.cvars.borrow().contains(arg_0) {
                match args.get(1) {
                    Some(arg_1) => {
                        if let Err(e) = self.cvars.borrow().set(arg_0.as_str(), arg_1.as_str()) {
                            self.println(format!("{}", e));
                        }
                    }
                    None => {
                        let msg = format!(
                            "\"{}\" is \"{}\"",
                            arg_0,
                            self.cvars.borrow().get(arg_0).unwrap()
                        );
                        self.println(msg);
                    }
                }
            } else {
                self.println(format!("Unrecognized command \"{}\"", arg_0));
            }
        }
    }
}

enum Chunk<'a> {
    Word(&'a str),
    Newline,
}

fn split_keeping_breaks(text: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    for (i, segment) in text.split('\n').enumerate() {
        if i > 0 {
            out.push(Chunk::Newline);
        }
        let mut rest = segment;
        while let Some(pos) = rest.find(|c: char| c != ' ') {
            // preserve leading spaces as part of the word boundary handling
            let (spaces, tail) = rest.split_at(pos);
            if !spaces.is_empty() {
                out.push(Chunk::Word(spaces));
            }
            let end = tail.find(' ').unwrap_or(tail.len());
            out.push(Chunk::Word(&tail[..end]));
            rest = &tail[end..];
        }
        if !rest.is_empty() {
            out.push(Chunk::Word(rest));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvar_noset_rejected() {
        let cvars = CvarRegistry::new();
        cvars.register("vk_driver", "native", CvarFlags::NOSET).unwrap();
        assert!(matches!(
            cvars.set("vk_driver", "other"),
            Err(ConsoleError::CvarWriteProtected(_))
        ));
        assert_eq!(cvars.get("vk_driver").unwrap(), "native");
    }

    #[test]
    fn test_cvar_latch_deferred() {
        let cvars = CvarRegistry::new();
        cvars.register("vk_mode", "3", CvarFlags::LATCH).unwrap();
        cvars.set("vk_mode", "5").unwrap();
        assert_eq!(cvars.get("vk_mode").unwrap(), "3");
        cvars.apply_latched();
        assert_eq!(cvars.get("vk_mode").unwrap(), "5");
    }

    #[test]
    fn test_cvar_get_value_resets_garbage() {
        let cvars = CvarRegistry::new();
        cvars.register("r_bloom", "1", CvarFlags::ARCHIVE).unwrap();
        cvars.set("r_bloom", "garbage").unwrap();
        assert_eq!(cvars.get_value("r_bloom").unwrap(), 1.0);
    }

    #[test]
    fn test_text_wraps_at_linewidth() {
        let mut text = ConsoleText::new(8);
        text.print("aaaa bbbb", Duration::zero());
        let first: String = text.line(0).iter().collect();
        let second: String = text.line(1).iter().collect();
        assert_eq!(first.trim_end(), "aaaa");
        assert_eq!(second.trim_end(), "bbbb");
    }

    #[test]
    fn test_text_resize_preserves_recent_lines() {
        let mut text = ConsoleText::new(16);
        text.print("one\ntwo\nthree", Duration::zero());
        text.resize(8);
        let lines: Vec<String> = (0..=text.current())
            .map(|l| text.line(l).iter().collect::<String>())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].trim_end(), "one");
        assert_eq!(lines[1].trim_end(), "two");
        assert_eq!(lines[2].trim_end(), "three");
    }

    #[test]
    fn test_notify_lines_age_out() {
        let mut text = ConsoleText::new(16);
        text.print("old\n", Duration::milliseconds(0));
        text.print("new\n", Duration::milliseconds(5000));

        let notify = text.notify_lines(Duration::milliseconds(5500), Duration::seconds(3));
        let joined: Vec<String> = notify
            .iter()
            .map(|l| l.iter().collect::<String>().trim_end().to_owned())
            .collect();
        assert!(joined.contains(&"new".to_owned()));
        assert!(!joined.contains(&"old".to_owned()));
    }

    #[test]
    fn test_cursor_blink() {
        assert!(!ConsoleText::cursor_visible(0));
        assert!(ConsoleText::cursor_visible(256));
        assert!(!ConsoleText::cursor_visible(512));
    }

    #[test]
    fn test_console_exec_sets_cvar() {
        let cmds = Rc::new(RefCell::new(CmdRegistry::new()));
        let cvars = Rc::new(RefCell::new(CvarRegistry::new()));
        cvars
            .borrow()
            .register("r_fxaa", "0", CvarFlags::ARCHIVE)
            .unwrap();

        let console = Console::new(cmds, cvars.clone(), 40);
        console.stuff_text("r_fxaa 1");
        console.execute();

        assert_eq!(cvars.borrow().get_value("r_fxaa").unwrap(), 1.0);
    }
}
