//! An engine for parsing and applying unified and context format patches.
//!
//! `linepatch` parses externally produced diff text into an in-memory model
//! and applies each hunk against a target text using fuzzy, offset-tolerant
//! matching, in the manner of the traditional `patch` tool: a hunk is tried
//! at its stated position first, then at nearby offsets with a growing fuzz
//! budget, and hunks that cannot be placed anywhere are rendered into
//! `.rej`-style reject text instead of being silently dropped.
//!
//! The engine deliberately does *not* compute diffs and does not touch the
//! filesystem. Callers hand it patch text and target lines and get back the
//! patched lines, a per-hunk report, and optional reject text.
//!
//! ## Getting Started
//!
//! ```rust
//! use linepatch::{parse_patch, apply_diff, read_lines, ApplyConfig};
//!
//! let patch_text = "\
//! --- a/greeting.txt
//! +++ b/greeting.txt
//! @@ -1,3 +1,3 @@
//!  hello
//! -world
//! +linepatch
//!  bye
//! ";
//!
//! let patch = parse_patch(patch_text);
//! assert_eq!(patch.diffs.len(), 1);
//! assert!(patch.errors.is_empty());
//!
//! let target = read_lines("hello\nworld\nbye\n");
//! let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
//!
//! assert!(result.all_applied());
//! assert_eq!(result.after_text(true), "hello\nlinepatch\nbye\n");
//! ```
//!
//! ## Key Concepts
//!
//! - [`Line`]: one logical line plus the exact delimiter found after it,
//!   so original text can be reconstructed byte for byte.
//! - [`Diff`]: all the changes for one file, holding an ordered list of
//!   [`Hunk`]s. A [`Patch`] is the full parse result: the diffs plus any
//!   [`ParseError`]s that were scoped to a single diff and recovered from.
//! - **Fuzz**: the number of leading and trailing context lines inside a
//!   hunk that are allowed to mismatch. Delete lines must always match.
//! - **Shift**: the cumulative line-count drift caused by earlier hunks in
//!   the same file. Later hunks start their search from the shifted
//!   position unless [`ApplyConfig::adjust_shift`] is disabled.
//!
//! ## Handling Rejects
//!
//! ```rust
//! use linepatch::{parse_patch, apply_diff, generate_reject, read_lines, ApplyConfig};
//!
//! let patch_text = "\
//! --- a/numbers.txt
//! +++ b/numbers.txt
//! @@ -1,3 +1,3 @@
//!  one
//! -TWO
//! +deux
//!  three
//! ";
//!
//! let patch = parse_patch(patch_text);
//! let target = read_lines("one\ntwo\nthree\n");
//! let config = ApplyConfig::builder().preserve_endings(true).build();
//! let result = apply_diff(&patch.diffs[0], &target, &config);
//!
//! // The delete line does not match the target, so the hunk is rejected
//! // and the target is left untouched.
//! assert!(!result.all_applied());
//! assert_eq!(result.after_text(true), "one\ntwo\nthree\n");
//!
//! let reject = generate_reject(&patch.diffs[0], &result, &config).unwrap();
//! assert_eq!(reject, "@@ -1,3 +1,3 @@\n one\n-TWO\n+deux\n three\n");
//! ```
use log::{debug, trace, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// --- Line Model ---

/// The platform line separator used when delimiters are normalized.
pub const PLATFORM_SEPARATOR: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// The exact delimiter bytes found after a line, or `None` for a final
/// unterminated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// No terminator (the last line of unterminated text).
    None,
    /// A lone carriage return.
    Cr,
    /// A line feed.
    Lf,
    /// A carriage return followed by a line feed.
    CrLf,
}

impl LineEnding {
    /// The raw delimiter bytes.
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::None => "",
            LineEnding::Cr => "\r",
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// The equality policy used when comparing a hunk line against a target line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatching {
    /// Content and delimiter must both match.
    Exact,
    /// Content must match; delimiters are ignored. This is the default
    /// policy, since patch text rarely carries the target's delimiters.
    IgnoreEndings,
    /// All whitespace is ignored on both sides.
    IgnoreWhitespace,
}

/// One logical line: its text content plus the exact delimiter found.
///
/// Keeping the delimiter separate from the content enables byte-exact
/// round-trip reconstruction of the original text while still allowing
/// delimiter-insensitive comparison during matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    content: String,
    ending: LineEnding,
}

impl Line {
    pub fn new(content: impl Into<String>, ending: LineEnding) -> Self {
        Self {
            content: content.into(),
            ending,
        }
    }

    /// The line text without its delimiter.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn ending(&self) -> LineEnding {
        self.ending
    }

    pub fn set_ending(&mut self, ending: LineEnding) {
        self.ending = ending;
    }

    /// Compares two lines under the given matching policy.
    ///
    /// ```
    /// # use linepatch::{Line, LineEnding, LineMatching};
    /// let a = Line::new("fn main() {", LineEnding::Lf);
    /// let b = Line::new("fn main() {", LineEnding::CrLf);
    /// assert!(!a.matches(&b, LineMatching::Exact));
    /// assert!(a.matches(&b, LineMatching::IgnoreEndings));
    ///
    /// let c = Line::new("fn main( ) {", LineEnding::Lf);
    /// assert!(!a.matches(&c, LineMatching::IgnoreEndings));
    /// assert!(a.matches(&c, LineMatching::IgnoreWhitespace));
    /// ```
    pub fn matches(&self, other: &Line, mode: LineMatching) -> bool {
        match mode {
            LineMatching::Exact => self.content == other.content && self.ending == other.ending,
            LineMatching::IgnoreEndings => self.content == other.content,
            LineMatching::IgnoreWhitespace => {
                let a = self.content.chars().filter(|c| !c.is_whitespace());
                let b = other.content.chars().filter(|c| !c.is_whitespace());
                a.eq(b)
            }
        }
    }
}

/// A lazy, restartable reader that splits raw text into [`Line`]s while
/// recognizing the original delimiter of each line.
///
/// `\n` and `\r\n` always terminate a line. A lone `\r` terminates a line
/// only when [`split_on_cr`](LineReader::split_on_cr) is enabled; otherwise
/// it stays inside the line content.
#[derive(Debug, Clone)]
pub struct LineReader<'a> {
    rest: &'a str,
    split_on_cr: bool,
}

impl<'a> LineReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            rest: text,
            split_on_cr: false,
        }
    }

    /// Treat a lone carriage return as a line terminator.
    pub fn split_on_cr(mut self, enabled: bool) -> Self {
        self.split_on_cr = enabled;
        self
    }
}

impl<'a> Iterator for LineReader<'a> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        if self.rest.is_empty() {
            return None;
        }
        let bytes = self.rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    let line = Line::new(&self.rest[..i], LineEnding::Lf);
                    self.rest = &self.rest[i + 1..];
                    return Some(line);
                }
                b'\r' => {
                    if bytes.get(i + 1) == Some(&b'\n') {
                        let line = Line::new(&self.rest[..i], LineEnding::CrLf);
                        self.rest = &self.rest[i + 2..];
                        return Some(line);
                    }
                    if self.split_on_cr {
                        let line = Line::new(&self.rest[..i], LineEnding::Cr);
                        self.rest = &self.rest[i + 1..];
                        return Some(line);
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        let line = Line::new(self.rest, LineEnding::None);
        self.rest = "";
        Some(line)
    }
}

/// Splits `text` into lines with their original delimiters.
///
/// ```
/// # use linepatch::{read_lines, LineEnding};
/// let lines = read_lines("a\r\nb\nc");
/// assert_eq!(lines.len(), 3);
/// assert_eq!(lines[0].ending(), LineEnding::CrLf);
/// assert_eq!(lines[1].ending(), LineEnding::Lf);
/// assert_eq!(lines[2].ending(), LineEnding::None);
/// ```
pub fn read_lines(text: &str) -> Vec<Line> {
    LineReader::new(text).collect()
}

/// Reconstructs text from a line sequence.
///
/// With `preserve_endings` every line gets back its exact original
/// delimiter, reproducing the source byte for byte. Without it, every line
/// that had some terminator gets the platform separator; a final
/// unterminated line stays unterminated.
pub fn render_lines(lines: &[Line], preserve_endings: bool) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.content());
        if preserve_endings {
            out.push_str(line.ending().as_str());
        } else if line.ending() != LineEnding::None {
            out.push_str(PLATFORM_SEPARATOR);
        }
    }
    out
}

/// The result of decoding raw bytes into text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    /// The decoded text.
    pub text: String,
    /// True when the bytes were not valid UTF-8 and a lossy fallback was
    /// used. Callers are expected to surface this to the user.
    pub lossy: bool,
}

/// Decodes target or patch bytes, falling back to lossy decoding when the
/// input is not valid UTF-8. The fallback is observable via
/// [`DecodedText::lossy`] rather than silent.
pub fn decode_bytes(bytes: &[u8]) -> DecodedText {
    match std::str::from_utf8(bytes) {
        Ok(text) => DecodedText {
            text: text.to_string(),
            lossy: false,
        },
        Err(_) => {
            warn!("input is not valid UTF-8; decoding lossily");
            DecodedText {
                text: String::from_utf8_lossy(bytes).into_owned(),
                lossy: true,
            }
        }
    }
}

// --- Error Types ---

/// A structural problem found while parsing patch text.
///
/// Parse errors are scoped to the diff being parsed when they occur: the
/// parser records the error, resynchronizes at the next recognizable
/// header, and keeps going, so one malformed file section never aborts the
/// surrounding patch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A `@@` line that could not be parsed as a hunk header.
    #[error("line {line}: malformed hunk header '{header}'")]
    MalformedHunkHeader { line: usize, header: String },
    /// A context-format range line (`*** a,b ****` or `--- c,d ----`) that
    /// could not be parsed.
    #[error("line {line}: malformed context range '{header}'")]
    MalformedContextRange { line: usize, header: String },
    /// The old and new blocks of a context-format hunk disagree on a line
    /// both sides claim is unchanged.
    #[error("line {line}: old and new context blocks disagree on an unchanged line")]
    InconsistentContext { line: usize },
    /// A line inside a hunk body that carries none of the expected markers.
    #[error("line {line}: unexpected content inside a hunk")]
    UnexpectedHunkLine { line: usize },
    /// The patch text ended before a hunk's stated line counts were
    /// satisfied.
    #[error("patch text ends inside the hunk starting at line {line}")]
    TruncatedHunk { line: usize },
}

// --- Data Model ---

/// The tag carried by one line of a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    /// An unchanged anchor line.
    Context,
    /// A line the patch inserts.
    Added,
    /// A line the patch removes.
    Removed,
}

impl LineTag {
    /// The marker byte used for this tag in unified diff bodies and in
    /// reject output.
    pub fn marker(self) -> char {
        match self {
            LineTag::Context => ' ',
            LineTag::Added => '+',
            LineTag::Removed => '-',
        }
    }

    /// Swaps additions and deletions; context is unaffected. This is the
    /// sense flip used by reverse application.
    pub fn flipped(self) -> LineTag {
        match self {
            LineTag::Context => LineTag::Context,
            LineTag::Added => LineTag::Removed,
            LineTag::Removed => LineTag::Added,
        }
    }
}

/// One tagged line inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub tag: LineTag,
    pub line: Line,
}

impl HunkLine {
    pub fn new(tag: LineTag, line: Line) -> Self {
        Self { tag, line }
    }
}

/// The derived classification of a hunk, based on which tags occur in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    Added,
    Deleted,
    Changed,
    /// Only context lines (or no lines at all).
    Unknown,
}

/// One contiguous block of change plus surrounding context within a file
/// diff.
///
/// Start positions are stored 0-based; the parser subtracts one from the
/// 1-based header values, clamping a header value of 0 to 0. Two hunks are
/// distinguished by their position in the owning diff, not by their ranges,
/// since ranges drift as earlier hunks apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// Disabled hunks are skipped during application and contribute no
    /// shift.
    pub enabled: bool,
}

impl Hunk {
    pub fn new(
        old_start: usize,
        old_len: usize,
        new_start: usize,
        new_len: usize,
        lines: Vec<HunkLine>,
    ) -> Self {
        Self {
            old_start,
            old_len,
            new_start,
            new_len,
            lines,
            enabled: true,
        }
    }

    /// Classifies the hunk by the tags it contains.
    pub fn kind(&self) -> HunkKind {
        let mut added = false;
        let mut removed = false;
        for hl in &self.lines {
            match hl.tag {
                LineTag::Added => added = true,
                LineTag::Removed => removed = true,
                LineTag::Context => {}
            }
        }
        match (added, removed) {
            (true, true) => HunkKind::Changed,
            (true, false) => HunkKind::Added,
            (false, true) => HunkKind::Deleted,
            (false, false) => HunkKind::Unknown,
        }
    }

    /// A short range description suitable for display.
    ///
    /// ```
    /// # use linepatch::Hunk;
    /// let hunk = Hunk::new(9, 3, 9, 6, vec![]);
    /// assert_eq!(hunk.description(), "9,3 -> 9,6");
    /// ```
    pub fn description(&self) -> String {
        format!(
            "{},{} -> {},{}",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }

    /// Creates a hunk that undoes this one: additions become deletions and
    /// the old and new ranges swap.
    pub fn invert(&self) -> Hunk {
        Hunk {
            old_start: self.new_start,
            old_len: self.new_len,
            new_start: self.old_start,
            new_len: self.old_len,
            lines: self
                .lines
                .iter()
                .map(|hl| HunkLine::new(hl.tag.flipped(), hl.line.clone()))
                .collect(),
            enabled: self.enabled,
        }
    }

    /// The stored start position the hunk is anchored at. Under reverse
    /// application the new range plays the role of the old one.
    pub fn start(&self, reverse: bool) -> usize {
        if reverse {
            self.new_start
        } else {
            self.old_start
        }
    }

    /// The length of the region the hunk consumes in the target.
    fn old_extent(&self, reverse: bool) -> usize {
        if reverse {
            self.new_len
        } else {
            self.old_len
        }
    }

    /// The net line-count change a successful application contributes to
    /// the running shift.
    pub fn delta(&self, reverse: bool) -> isize {
        let delta = self.new_len as isize - self.old_len as isize;
        if reverse {
            -delta
        } else {
            delta
        }
    }
}

/// The derived classification of a whole file diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// The old path is absent: the patch creates the file.
    Addition,
    /// The new path is absent: the patch deletes the file.
    Deletion,
    Change,
}

/// All the changes for one old/new file pair in a patch.
///
/// Hunks are kept in ascending old-start order; [`Diff::insert_hunk`]
/// preserves the order and hunks carry no back-pointer to their owner, so
/// moving a hunk between diffs is a plain remove plus ordered insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    /// The old file path, or `None` when the header named the `/dev/null`
    /// sentinel (a file addition).
    pub old_path: Option<PathBuf>,
    /// The new file path, or `None` for a file deletion.
    pub new_path: Option<PathBuf>,
    /// The owning project for multi-project patches (`#P` lines), if any.
    pub project: Option<String>,
    /// Header lines (such as `Index:` or `diff` lines) that preceded this
    /// diff in the patch text.
    pub header: Vec<Line>,
    pub hunks: Vec<Hunk>,
    /// Disabled diffs are excluded from application by callers.
    pub enabled: bool,
    /// Replacement content supplied by a caller that hand-merged this diff;
    /// it overrides the computed result when present.
    pub manual_content: Option<String>,
}

impl Diff {
    pub fn new(old_path: Option<PathBuf>, new_path: Option<PathBuf>) -> Self {
        Self {
            old_path,
            new_path,
            project: None,
            header: Vec::new(),
            hunks: Vec::new(),
            enabled: true,
            manual_content: None,
        }
    }

    pub fn kind(&self) -> DiffKind {
        if self.old_path.is_none() {
            DiffKind::Addition
        } else if self.new_path.is_none() {
            DiffKind::Deletion
        } else {
            DiffKind::Change
        }
    }

    /// The path of the file this diff targets, with `strip` leading
    /// components removed. Under reverse application the new path is the
    /// target; either way the other side's path stands in when the primary
    /// one is absent.
    pub fn target_path(&self, strip: usize, reverse: bool) -> Option<PathBuf> {
        let (primary, secondary) = if reverse {
            (self.new_path.as_ref(), self.old_path.as_ref())
        } else {
            (self.old_path.as_ref(), self.new_path.as_ref())
        };
        let path = primary.or(secondary)?;
        Some(strip_segments(path, strip))
    }

    /// Inserts a hunk at the position that keeps the list ordered by
    /// ascending old start.
    pub fn insert_hunk(&mut self, hunk: Hunk) {
        let at = self
            .hunks
            .iter()
            .position(|h| h.old_start > hunk.old_start)
            .unwrap_or(self.hunks.len());
        self.hunks.insert(at, hunk);
    }

    /// Removes and returns the hunk at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove_hunk(&mut self, index: usize) -> Hunk {
        self.hunks.remove(index)
    }
}

/// Strips `strip` leading components from a path, always keeping at least
/// the file name.
fn strip_segments(path: &Path, strip: usize) -> PathBuf {
    let components: Vec<_> = path.components().collect();
    let keep = components.len().saturating_sub(strip).max(1);
    components[components.len() - keep..].iter().collect()
}

/// The parse result for one patch text: every recognized file diff in file
/// order, plus the per-diff errors the parser recovered from.
///
/// An empty patch (no recognizable headers) yields zero diffs and zero
/// errors; callers should treat that as "nothing to apply".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub diffs: Vec<Diff>,
    pub errors: Vec<ParseError>,
}

impl Patch {
    /// True when no file diffs were recognized.
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Moves the hunk at `hunk_index` in diff `from` into diff `to`,
    /// keeping the destination ordered by old start. Returns `None` when
    /// any index is out of bounds.
    pub fn retarget_hunk(&mut self, from: usize, hunk_index: usize, to: usize) -> Option<()> {
        if from >= self.diffs.len() || to >= self.diffs.len() {
            return None;
        }
        if hunk_index >= self.diffs[from].hunks.len() {
            return None;
        }
        let hunk = self.diffs[from].remove_hunk(hunk_index);
        self.diffs[to].insert_hunk(hunk);
        Some(())
    }
}

// --- Configuration ---

/// The fuzz budget for a file: an explicit limit, or automatic discovery of
/// the smallest limit that lets the file's hunks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzFactor {
    Limit(usize),
    Auto,
}

impl Default for FuzzFactor {
    fn default() -> Self {
        // The traditional patch default.
        FuzzFactor::Limit(2)
    }
}

/// Options controlling how a patch is matched and applied.
///
/// The configuration is a plain value passed into every call; the engine
/// keeps no shared state, and results are recomputed whenever the caller
/// changes any of these knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyConfig {
    /// Number of leading path components stripped from diff paths when
    /// resolving the target file.
    pub strip: usize,
    /// The fuzz budget, or automatic discovery.
    pub fuzz: FuzzFactor,
    /// Apply the patch backwards: additions delete, deletions add, and the
    /// new ranges anchor the hunks.
    pub reverse: bool,
    /// Ignore all whitespace when comparing lines.
    pub ignore_whitespace: bool,
    /// Keep each line's original delimiter when rendering results and
    /// reject text instead of normalizing to the platform separator.
    pub preserve_endings: bool,
    /// Fold each applied hunk's offset and line-count delta into the
    /// running shift for the hunks after it. When disabled, every hunk
    /// starts its search from its unshifted stored position, reproducing
    /// traditional patch-tool semantics.
    pub adjust_shift: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            strip: 0,
            fuzz: FuzzFactor::default(),
            reverse: false,
            ignore_whitespace: false,
            preserve_endings: false,
            adjust_shift: true,
        }
    }
}

impl ApplyConfig {
    /// Creates a new builder for `ApplyConfig`.
    ///
    /// ```
    /// # use linepatch::{ApplyConfig, FuzzFactor};
    /// let config = ApplyConfig::builder()
    ///     .strip(1)
    ///     .fuzz(FuzzFactor::Limit(0))
    ///     .reverse(true)
    ///     .build();
    /// assert_eq!(config.strip, 1);
    /// assert!(config.reverse);
    /// ```
    pub fn builder() -> ApplyConfigBuilder {
        ApplyConfigBuilder::default()
    }

    /// The line matching policy implied by the whitespace option.
    pub fn matching(&self) -> LineMatching {
        if self.ignore_whitespace {
            LineMatching::IgnoreWhitespace
        } else {
            LineMatching::IgnoreEndings
        }
    }
}

/// A builder for [`ApplyConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyConfigBuilder {
    strip: Option<usize>,
    fuzz: Option<FuzzFactor>,
    reverse: Option<bool>,
    ignore_whitespace: Option<bool>,
    preserve_endings: Option<bool>,
    adjust_shift: Option<bool>,
}

impl ApplyConfigBuilder {
    pub fn strip(mut self, strip: usize) -> Self {
        self.strip = Some(strip);
        self
    }

    pub fn fuzz(mut self, fuzz: FuzzFactor) -> Self {
        self.fuzz = Some(fuzz);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = Some(reverse);
        self
    }

    pub fn ignore_whitespace(mut self, ignore_whitespace: bool) -> Self {
        self.ignore_whitespace = Some(ignore_whitespace);
        self
    }

    pub fn preserve_endings(mut self, preserve_endings: bool) -> Self {
        self.preserve_endings = Some(preserve_endings);
        self
    }

    pub fn adjust_shift(mut self, adjust_shift: bool) -> Self {
        self.adjust_shift = Some(adjust_shift);
        self
    }

    pub fn build(self) -> ApplyConfig {
        let default = ApplyConfig::default();
        ApplyConfig {
            strip: self.strip.unwrap_or(default.strip),
            fuzz: self.fuzz.unwrap_or(default.fuzz),
            reverse: self.reverse.unwrap_or(default.reverse),
            ignore_whitespace: self.ignore_whitespace.unwrap_or(default.ignore_whitespace),
            preserve_endings: self.preserve_endings.unwrap_or(default.preserve_endings),
            adjust_shift: self.adjust_shift.unwrap_or(default.adjust_shift),
        }
    }
}

/// A cooperative cancellation signal for long-running fuzz discovery.
///
/// Share one flag between the thread driving [`calculate_fuzz`] and the
/// code that wants to interrupt it (typically via `Arc`). Cancellation is
/// checked between probes; a cancelled run reports
/// [`FuzzOutcome::Cancelled`], never a partial fuzz value.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// --- Diff Format Parser ---

/// Parses patch text into a [`Patch`].
///
/// Both unified (`---`/`+++`/`@@`) and context (`***`/`---`/`***************`)
/// formats are recognized, and a single patch may mix them. Unrecognized
/// lines between file sections (such as `Index:` or `diff` lines) are
/// attached as header metadata to the diff that follows them; `#P` lines
/// set the owning project for the diffs after them.
///
/// Structural problems are recorded in [`Patch::errors`] and scoped to the
/// diff being parsed; the parser resynchronizes and continues with the next
/// file section. Text with no recognizable headers parses to zero diffs.
pub fn parse_patch(text: &str) -> Patch {
    let lines = read_lines(text);
    let mut parser = PatchParser::new(&lines);
    parser.run();
    debug!(
        "parsed {} diff(s), {} error(s)",
        parser.diffs.len(),
        parser.errors.len()
    );
    Patch {
        diffs: parser.diffs,
        errors: parser.errors,
    }
}

struct PatchParser<'a> {
    lines: &'a [Line],
    index: usize,
    diffs: Vec<Diff>,
    errors: Vec<ParseError>,
    pending_header: Vec<Line>,
    project: Option<String>,
}

impl<'a> PatchParser<'a> {
    fn new(lines: &'a [Line]) -> Self {
        Self {
            lines,
            index: 0,
            diffs: Vec::new(),
            errors: Vec::new(),
            pending_header: Vec::new(),
            project: None,
        }
    }

    fn content(&self, index: usize) -> &str {
        self.lines[index].content()
    }

    /// 1-based line number of the current position, for error reporting.
    fn line_no(&self) -> usize {
        self.index + 1
    }

    fn run(&mut self) {
        while self.index < self.lines.len() {
            let content = self.content(self.index);
            if let Some(project) = content.strip_prefix("#P ") {
                trace!("project marker '{}'", project.trim());
                self.project = Some(project.trim().to_string());
                self.index += 1;
            } else if content.starts_with("--- ") && self.peek_starts_with(1, "+++ ") {
                self.parse_unified_diff();
            } else if content.starts_with("*** ")
                && !content.starts_with("****")
                && self.peek_starts_with(1, "--- ")
            {
                self.parse_context_diff();
            } else {
                // Leading garbage: keep it as header metadata for the next
                // file section.
                self.pending_header.push(self.lines[self.index].clone());
                self.index += 1;
            }
        }
    }

    fn peek_starts_with(&self, ahead: usize, prefix: &str) -> bool {
        self.lines
            .get(self.index + ahead)
            .is_some_and(|l| l.content().starts_with(prefix))
    }

    /// Skips forward to the next line that can start a file section or a
    /// hunk, so one malformed hunk does not consume the rest of the patch.
    fn resync(&mut self) {
        while self.index < self.lines.len() {
            let c = self.content(self.index);
            if c.starts_with("--- ")
                || c.starts_with("*** ")
                || c.starts_with("@@")
                || c.starts_with("Index:")
                || c.starts_with("diff ")
                || c.starts_with("#P ")
            {
                return;
            }
            self.index += 1;
        }
    }

    fn take_header(&mut self) -> Vec<Line> {
        std::mem::take(&mut self.pending_header)
    }

    // - Unified format -

    fn parse_unified_diff(&mut self) {
        let old_path = extract_path(self.content(self.index).trim_start_matches("--- "));
        let new_path = extract_path(self.content(self.index + 1).trim_start_matches("+++ "));
        trace!(
            "unified diff header at line {}: {:?} -> {:?}",
            self.line_no(),
            old_path,
            new_path
        );
        self.index += 2;

        let mut diff = Diff::new(old_path, new_path);
        diff.project = self.project.clone();
        diff.header = self.take_header();

        while self.index < self.lines.len() && self.content(self.index).starts_with("@@") {
            match self.parse_unified_hunk() {
                Ok(hunk) => diff.hunks.push(hunk),
                Err(error) => {
                    warn!("recoverable parse error: {}", error);
                    self.errors.push(error);
                    self.resync();
                }
            }
        }
        self.diffs.push(diff);
    }

    fn parse_unified_hunk(&mut self) -> Result<Hunk, ParseError> {
        let header_line_no = self.line_no();
        let header = self.content(self.index).to_string();
        let Some((old_start, old_len, new_start, new_len)) = parse_unified_ranges(&header) else {
            // Skip the bad header so resynchronization makes progress.
            self.index += 1;
            return Err(ParseError::MalformedHunkHeader {
                line: header_line_no,
                header,
            });
        };
        self.index += 1;

        let mut lines = Vec::new();
        let mut old_remaining = old_len;
        let mut new_remaining = new_len;
        while old_remaining > 0 || new_remaining > 0 {
            if self.index >= self.lines.len() {
                return Err(ParseError::TruncatedHunk {
                    line: header_line_no,
                });
            }
            let raw = &self.lines[self.index];
            let content = raw.content();
            if let Some(rest) = content.strip_prefix('+') {
                if new_remaining == 0 {
                    return Err(ParseError::UnexpectedHunkLine {
                        line: self.line_no(),
                    });
                }
                new_remaining -= 1;
                lines.push(HunkLine::new(
                    LineTag::Added,
                    Line::new(rest, raw.ending()),
                ));
            } else if let Some(rest) = content.strip_prefix('-') {
                if old_remaining == 0 {
                    return Err(ParseError::UnexpectedHunkLine {
                        line: self.line_no(),
                    });
                }
                old_remaining -= 1;
                lines.push(HunkLine::new(
                    LineTag::Removed,
                    Line::new(rest, raw.ending()),
                ));
            } else if content.starts_with('\\') {
                // "\ No newline at end of file": the preceding collected
                // line loses its delimiter rather than this becoming a line.
                if let Some(last) = lines.last_mut() {
                    last.line.set_ending(LineEnding::None);
                }
            } else if content.starts_with(' ') || content.is_empty() {
                // Some producers emit truly empty context lines.
                if old_remaining == 0 || new_remaining == 0 {
                    return Err(ParseError::UnexpectedHunkLine {
                        line: self.line_no(),
                    });
                }
                old_remaining -= 1;
                new_remaining -= 1;
                let text = content.strip_prefix(' ').unwrap_or(content);
                lines.push(HunkLine::new(
                    LineTag::Context,
                    Line::new(text, raw.ending()),
                ));
            } else {
                return Err(ParseError::UnexpectedHunkLine {
                    line: self.line_no(),
                });
            }
            self.index += 1;
        }

        // A trailing no-newline marker can follow the final hunk line.
        if self.index < self.lines.len() && self.content(self.index).starts_with('\\') {
            if let Some(last) = lines.last_mut() {
                last.line.set_ending(LineEnding::None);
            }
            self.index += 1;
        }

        Ok(Hunk::new(
            start0(old_start),
            old_len,
            start0(new_start),
            new_len,
            lines,
        ))
    }

    // - Context format -

    fn parse_context_diff(&mut self) {
        let old_path = extract_path(self.content(self.index).trim_start_matches("*** "));
        let new_path = extract_path(self.content(self.index + 1).trim_start_matches("--- "));
        trace!(
            "context diff header at line {}: {:?} -> {:?}",
            self.line_no(),
            old_path,
            new_path
        );
        self.index += 2;

        let mut diff = Diff::new(old_path, new_path);
        diff.project = self.project.clone();
        diff.header = self.take_header();

        while self.index < self.lines.len() && self.content(self.index).starts_with("***************")
        {
            self.index += 1;
            match self.parse_context_hunk() {
                Ok(hunk) => diff.hunks.push(hunk),
                Err(error) => {
                    warn!("recoverable parse error: {}", error);
                    self.errors.push(error);
                    self.resync();
                    break;
                }
            }
        }
        self.diffs.push(diff);
    }

    fn parse_context_hunk(&mut self) -> Result<Hunk, ParseError> {
        let hunk_line_no = self.line_no();
        if self.index >= self.lines.len() {
            return Err(ParseError::TruncatedHunk { line: hunk_line_no });
        }

        // Old range: "*** start[,end] ****".
        let header = self.content(self.index).to_string();
        let Some((old_start, old_len)) = parse_context_range(&header, "*** ", "****") else {
            self.index += 1;
            return Err(ParseError::MalformedContextRange {
                line: hunk_line_no,
                header,
            });
        };
        self.index += 1;

        // Old block body, up to the new range line.
        let mut old_block: Vec<(char, Line)> = Vec::new();
        while self.index < self.lines.len() {
            let content = self.content(self.index);
            if content.starts_with("--- ") {
                break;
            }
            if content.starts_with('\\') {
                // "\ No newline at end of file" strips the delimiter of the
                // line collected just before it.
                if let Some((_, line)) = old_block.last_mut() {
                    line.set_ending(LineEnding::None);
                }
                self.index += 1;
                continue;
            }
            old_block.push(self.take_context_body_line()?);
        }

        if self.index >= self.lines.len() {
            return Err(ParseError::TruncatedHunk { line: hunk_line_no });
        }

        // New range: "--- start[,end] ----".
        let header = self.content(self.index).to_string();
        let Some((new_start, new_len)) = parse_context_range(&header, "--- ", "----") else {
            self.index += 1;
            return Err(ParseError::MalformedContextRange {
                line: self.line_no() - 1,
                header,
            });
        };
        self.index += 1;

        // New block body: exactly new_len lines when present, absent when
        // the new side is unchanged.
        let mut new_block: Vec<(char, Line)> = Vec::new();
        while new_block.len() < new_len && self.index < self.lines.len() {
            let content = self.content(self.index);
            if content.starts_with("***************") || content.starts_with("Index:") {
                break;
            }
            if content.starts_with("*** ") || content.starts_with("diff ") {
                break;
            }
            if content.starts_with('\\') {
                if let Some((_, line)) = new_block.last_mut() {
                    line.set_ending(LineEnding::None);
                }
                self.index += 1;
                continue;
            }
            new_block.push(self.take_context_body_line()?);
        }
        // A marker after the last body line still belongs to this hunk.
        if self.index < self.lines.len() && self.content(self.index).starts_with('\\') {
            if let Some((_, line)) = new_block.last_mut() {
                line.set_ending(LineEnding::None);
            }
            self.index += 1;
        }

        let lines = unify_context_blocks(&old_block, &new_block, hunk_line_no)?;
        Ok(Hunk::new(
            start0(old_start),
            old_len,
            start0(new_start),
            new_len,
            lines,
        ))
    }

    /// Reads one context-format body line: a two character marker prefix
    /// followed by the content.
    fn take_context_body_line(&mut self) -> Result<(char, Line), ParseError> {
        let raw = &self.lines[self.index];
        let content = raw.content();
        let (marker, rest) = match content {
            c if c.starts_with("  ") => (' ', &c[2..]),
            c if c.starts_with("- ") => ('-', &c[2..]),
            c if c.starts_with("+ ") => ('+', &c[2..]),
            c if c.starts_with("! ") => ('!', &c[2..]),
            c if c.is_empty() => (' ', c),
            _ => {
                return Err(ParseError::UnexpectedHunkLine {
                    line: self.line_no(),
                })
            }
        };
        let line = Line::new(rest, raw.ending());
        self.index += 1;
        Ok((marker, line))
    }
}

/// Subtracts one from a 1-based header position, clamping 0 to 0.
fn start0(header_value: usize) -> usize {
    header_value.saturating_sub(1)
}

/// Extracts a file path from a header remainder such as
/// `a/src/main.rs<TAB>2024-05-01 10:00:00` or `foo.c: old copy`.
///
/// The path is the part before the first tab, or before the last colon when
/// there is no tab. The `/dev/null` sentinel maps to `None` (file
/// addition/deletion).
fn extract_path(rest: &str) -> Option<PathBuf> {
    let rest = rest.trim_start();
    let cut = match rest.find('\t') {
        Some(tab) => &rest[..tab],
        None => match rest.rfind(':') {
            Some(colon) => &rest[..colon],
            None => rest,
        },
    };
    let cut = cut.trim();
    if cut.is_empty() || cut == "/dev/null" {
        None
    } else {
        Some(PathBuf::from(cut))
    }
}

/// Parses `@@ -a[,b] +c[,d] @@`, returning the 1-based starts and lengths.
fn parse_unified_ranges(header: &str) -> Option<(usize, usize, usize, usize)> {
    let mut parts = header.split_whitespace();
    if parts.next() != Some("@@") {
        return None;
    }
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let (old_start, old_len) = parse_start_len(old)?;
    let (new_start, new_len) = parse_start_len(new)?;
    Some((old_start, old_len, new_start, new_len))
}

/// Parses `a[,b]` where the omitted length defaults to 1.
fn parse_start_len(text: &str) -> Option<(usize, usize)> {
    match text.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((text.parse().ok()?, 1)),
    }
}

/// Parses a context range line such as `*** 3,7 ****` into a 1-based start
/// and a length (`end - start + 1`; the single number form has length 1 and
/// `0,0` marks an empty side).
fn parse_context_range(header: &str, prefix: &str, suffix: &str) -> Option<(usize, usize)> {
    let body = header.strip_prefix(prefix)?.trim_end();
    let body = body.strip_suffix(suffix)?.trim();
    match body.split_once(',') {
        Some((start, end)) => {
            let start: usize = start.trim().parse().ok()?;
            let end: usize = end.trim().parse().ok()?;
            if start == 0 && end == 0 {
                return Some((0, 0));
            }
            if end < start {
                return None;
            }
            Some((start, end - start + 1))
        }
        None => {
            let start: usize = body.trim().parse().ok()?;
            Some((start, 1))
        }
    }
}

/// Merges the separate old and new blocks of a context-format hunk into the
/// unified tagged line model.
///
/// Runs of `-` become deletions, runs of `+` become additions, paired `!`
/// runs become a deletion run immediately followed by the matching addition
/// run (old before new), and space runs present on both sides must be
/// textually identical and collapse to single context lines.
fn unify_context_blocks(
    old_block: &[(char, Line)],
    new_block: &[(char, Line)],
    hunk_line: usize,
) -> Result<Vec<HunkLine>, ParseError> {
    let mut lines = Vec::with_capacity(old_block.len() + new_block.len());
    let mut i = 0;
    let mut j = 0;
    while i < old_block.len() || j < new_block.len() {
        if i < old_block.len() && old_block[i].0 == '-' {
            lines.push(HunkLine::new(LineTag::Removed, old_block[i].1.clone()));
            i += 1;
        } else if j < new_block.len() && new_block[j].0 == '+' {
            lines.push(HunkLine::new(LineTag::Added, new_block[j].1.clone()));
            j += 1;
        } else if i < old_block.len() && old_block[i].0 == '!' {
            // A changed run: the old side's '!' lines become deletions and
            // the aligned '!' run on the new side becomes the additions.
            while i < old_block.len() && old_block[i].0 == '!' {
                lines.push(HunkLine::new(LineTag::Removed, old_block[i].1.clone()));
                i += 1;
            }
            if j >= new_block.len() || new_block[j].0 != '!' {
                return Err(ParseError::InconsistentContext { line: hunk_line });
            }
            while j < new_block.len() && new_block[j].0 == '!' {
                lines.push(HunkLine::new(LineTag::Added, new_block[j].1.clone()));
                j += 1;
            }
        } else if i < old_block.len() && j < new_block.len() {
            // Both sides claim this line is unchanged; they must agree.
            if !old_block[i].1.matches(&new_block[j].1, LineMatching::IgnoreEndings) {
                return Err(ParseError::InconsistentContext { line: hunk_line });
            }
            lines.push(HunkLine::new(LineTag::Context, old_block[i].1.clone()));
            i += 1;
            j += 1;
        } else if i < old_block.len() {
            // The new block was omitted because that side is unchanged.
            lines.push(HunkLine::new(LineTag::Context, old_block[i].1.clone()));
            i += 1;
        } else {
            lines.push(HunkLine::new(LineTag::Context, new_block[j].1.clone()));
            j += 1;
        }
    }
    Ok(lines)
}

// --- Hunk Matching and Application ---

/// Read and edit access to a sequence of target lines.
///
/// The matcher plans against any implementor and the applier mutates
/// through it, so the same walk serves both the read-only fit check and
/// the real application.
pub trait LineTarget {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn line(&self, index: usize) -> &Line;
    fn remove_line(&mut self, index: usize) -> Line;
    fn insert_line(&mut self, index: usize, line: Line);
}

impl LineTarget for Vec<Line> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn line(&self, index: usize) -> &Line {
        &self[index]
    }

    fn remove_line(&mut self, index: usize) -> Line {
        self.remove(index)
    }

    fn insert_line(&mut self, index: usize, line: Line) {
        self.insert(index, line);
    }
}

/// One planned mutation, in the coordinates of the unmodified target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Edit {
    Remove(usize),
    Insert(usize, Line),
}

/// Checks whether a hunk would apply at `pos` without mutating anything.
pub fn hunk_fits<T: LineTarget>(
    hunk: &Hunk,
    target: &T,
    pos: usize,
    fuzz: usize,
    matching: LineMatching,
    reverse: bool,
) -> bool {
    plan_hunk(hunk, target, pos, fuzz, matching, reverse).is_some()
}

/// Walks a hunk against the target starting at `pos` and produces the edit
/// plan when it fits within the fuzz budget.
///
/// Context lines anchor the walk. Up to `fuzz` of them may mismatch where
/// they border a change: the last entries of a context run preceding a
/// change, and the first entries of the trailing run. Delete lines must
/// always match.
fn plan_hunk<T: LineTarget>(
    hunk: &Hunk,
    target: &T,
    pos: usize,
    fuzz: usize,
    matching: LineMatching,
    reverse: bool,
) -> Option<Vec<Edit>> {
    if pos > target.len() {
        return None;
    }
    // A pure insertion names the line it follows, so the insertion point is
    // one past the stated position when the target still has room there.
    let pos = if hunk.old_extent(reverse) == 0 && pos + 1 <= target.len() {
        pos + 1
    } else {
        pos
    };

    let mut edits = Vec::new();
    let mut cursor = pos;
    let mut pending: Vec<bool> = Vec::new();

    for hunk_line in &hunk.lines {
        let tag = if reverse {
            hunk_line.tag.flipped()
        } else {
            hunk_line.tag
        };
        match tag {
            LineTag::Context => {
                let matched = cursor < target.len()
                    && target.line(cursor).matches(&hunk_line.line, matching);
                if !matched && fuzz == 0 {
                    return None;
                }
                pending.push(matched);
                if cursor < target.len() {
                    cursor += 1;
                }
            }
            LineTag::Removed => {
                if !preceding_run_ok(&pending, fuzz) {
                    return None;
                }
                pending.clear();
                if cursor >= target.len()
                    || !target.line(cursor).matches(&hunk_line.line, matching)
                {
                    return None;
                }
                edits.push(Edit::Remove(cursor));
                cursor += 1;
            }
            LineTag::Added => {
                if !preceding_run_ok(&pending, fuzz) {
                    return None;
                }
                pending.clear();
                edits.push(Edit::Insert(cursor, hunk_line.line.clone()));
            }
        }
    }
    if !trailing_run_ok(&pending, fuzz) {
        return None;
    }
    Some(edits)
}

/// A context run immediately before a change may only mismatch in its last
/// `fuzz` entries.
fn preceding_run_ok(pending: &[bool], fuzz: usize) -> bool {
    let protected = pending.len().saturating_sub(fuzz);
    pending[..protected].iter().all(|&matched| matched)
}

/// The trailing context run may only mismatch in its first `fuzz` entries.
fn trailing_run_ok(pending: &[bool], fuzz: usize) -> bool {
    pending[fuzz.min(pending.len())..]
        .iter()
        .all(|&matched| matched)
}

/// Executes a plan produced by [`plan_hunk`], keeping a running index
/// adjustment so the original-coordinate plan lands correctly as the target
/// grows and shrinks.
fn execute_edits<T: LineTarget>(target: &mut T, edits: &[Edit]) {
    let mut adjust: isize = 0;
    for edit in edits {
        match edit {
            Edit::Remove(index) => {
                target.remove_line((*index as isize + adjust) as usize);
                adjust -= 1;
            }
            Edit::Insert(index, line) => {
                target.insert_line((*index as isize + adjust) as usize, line.clone());
                adjust += 1;
            }
        }
    }
}

// --- Fuzz and Shift Control ---

/// The outcome for one hunk after application was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkResult {
    /// The hunk was placed and its edits executed.
    Applied {
        /// The fuzz level the match needed. Greater than zero marks the
        /// match as fuzzy.
        fuzz: usize,
        /// The distance from the shifted nominal position to where the
        /// hunk actually matched; negative is earlier in the file.
        offset: isize,
        /// The running shift that was in effect when the hunk was placed.
        shift: isize,
    },
    /// No probed position accepted the hunk.
    Rejected,
    /// The hunk was disabled and not attempted.
    Skipped,
}

impl HunkResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, HunkResult::Applied { .. })
    }

    /// True when the hunk applied but needed a nonzero fuzz level.
    pub fn is_fuzzy(&self) -> bool {
        matches!(self, HunkResult::Applied { fuzz, .. } if *fuzz > 0)
    }
}

/// The result of applying one [`Diff`] against a target line sequence.
///
/// This is a computed view: it holds copies of the lines and per-hunk
/// outcomes, and nothing in the [`Patch`] tree refers back to it.
#[derive(Debug, Clone)]
pub struct FileDiffResult {
    /// The target lines as they were handed in.
    pub before: Vec<Line>,
    /// The target lines after every placeable hunk was executed.
    pub after: Vec<Line>,
    /// One entry per hunk, in hunk order.
    pub hunk_results: Vec<HunkResult>,
    /// The highest fuzz level any applied hunk needed.
    pub fuzz: usize,
}

impl FileDiffResult {
    /// True when no hunk was rejected. Skipped (disabled) hunks do not
    /// count as failures.
    pub fn all_applied(&self) -> bool {
        !self
            .hunk_results
            .iter()
            .any(|r| matches!(r, HunkResult::Rejected))
    }

    /// Renders the patched lines back to text. See [`render_lines`].
    pub fn after_text(&self, preserve_endings: bool) -> String {
        render_lines(&self.after, preserve_endings)
    }

    /// The hunks of `diff` this result rejected, in hunk order.
    pub fn rejected_hunks<'a>(&self, diff: &'a Diff) -> Vec<&'a Hunk> {
        diff.hunks
            .iter()
            .zip(&self.hunk_results)
            .filter(|(_, r)| matches!(r, HunkResult::Rejected))
            .map(|(hunk, _)| hunk)
            .collect()
    }
}

struct Placement {
    edits: Vec<Edit>,
    fuzz: usize,
    offset: isize,
}

/// Probes for a position that accepts the hunk: fuzz levels from 0 up to
/// the limit, and at each level offset 0 first, then the positions behind
/// the nominal start, then the positions ahead. The first success wins, so
/// exact matches always beat fuzzy ones and near matches beat far ones.
fn locate_hunk<T: LineTarget>(
    hunk: &Hunk,
    target: &T,
    nominal: isize,
    fuzz_limit: usize,
    matching: LineMatching,
    reverse: bool,
) -> Option<Placement> {
    for level in 0..=fuzz_limit {
        let mut offsets: Vec<isize> = Vec::with_capacity(2 * level + 1);
        offsets.push(0);
        offsets.extend((1..=level as isize).map(|d| -d));
        offsets.extend(1..=level as isize);
        for offset in offsets {
            let pos = nominal + offset;
            if pos < 0 || pos as usize > target.len() {
                continue;
            }
            if let Some(edits) = plan_hunk(hunk, target, pos as usize, level, matching, reverse) {
                if level > 0 || offset != 0 {
                    debug!(
                        "hunk {} matched with fuzz {} at offset {}",
                        hunk.description(),
                        level,
                        offset
                    );
                }
                return Some(Placement {
                    edits,
                    fuzz: level,
                    offset,
                });
            }
        }
    }
    None
}

/// Applies every enabled hunk of `diff` to `target`, honoring the fuzz
/// factor, reverse flag and shift policy in `config`.
///
/// The input lines are never mutated; the returned result carries the
/// patched copy. With [`FuzzFactor::Auto`] the fuzz limit is discovered
/// first via [`calculate_fuzz`].
pub fn apply_diff(diff: &Diff, target: &[Line], config: &ApplyConfig) -> FileDiffResult {
    let fuzz_limit = match config.fuzz {
        FuzzFactor::Limit(limit) => limit,
        FuzzFactor::Auto => {
            let cancel = CancelFlag::new();
            match calculate_fuzz(diff, target, config, &cancel) {
                FuzzOutcome::Fuzz(found) => {
                    debug!("auto fuzz settled on {}", found);
                    found
                }
                _ => 0,
            }
        }
    };
    apply_diff_with_fuzz(diff, target, config, fuzz_limit)
}

/// Applies the diff with an explicit fuzz limit, ignoring
/// [`ApplyConfig::fuzz`].
pub fn apply_diff_with_fuzz(
    diff: &Diff,
    target: &[Line],
    config: &ApplyConfig,
    fuzz_limit: usize,
) -> FileDiffResult {
    // Manually merged content short-circuits hunk matching entirely.
    if let Some(content) = &diff.manual_content {
        debug!("using manually merged content ({} bytes)", content.len());
        return FileDiffResult {
            before: target.to_vec(),
            after: read_lines(content),
            hunk_results: vec![HunkResult::Skipped; diff.hunks.len()],
            fuzz: 0,
        };
    }

    let mut lines = target.to_vec();
    let matching = config.matching();
    let mut shift: isize = 0;
    let mut hunk_results = Vec::with_capacity(diff.hunks.len());
    let mut max_fuzz = 0;

    for hunk in &diff.hunks {
        if !hunk.enabled {
            trace!("skipping disabled hunk {}", hunk.description());
            hunk_results.push(HunkResult::Skipped);
            continue;
        }
        let base = if config.adjust_shift { shift } else { 0 };
        let nominal = hunk.start(config.reverse) as isize + base;
        match locate_hunk(hunk, &lines, nominal, fuzz_limit, matching, config.reverse) {
            Some(placement) => {
                execute_edits(&mut lines, &placement.edits);
                if config.adjust_shift {
                    shift += placement.offset + hunk.delta(config.reverse);
                }
                max_fuzz = max_fuzz.max(placement.fuzz);
                hunk_results.push(HunkResult::Applied {
                    fuzz: placement.fuzz,
                    offset: placement.offset,
                    shift: base,
                });
            }
            None => {
                warn!("hunk {} could not be placed; rejecting", hunk.description());
                hunk_results.push(HunkResult::Rejected);
            }
        }
    }

    FileDiffResult {
        before: target.to_vec(),
        after: lines,
        hunk_results,
        fuzz: max_fuzz,
    }
}

/// The outcome of automatic fuzz discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzOutcome {
    /// At least one hunk matched; the value is the highest fuzz any
    /// matched hunk needed.
    Fuzz(usize),
    /// No hunk matched anywhere in the target.
    Unmatched,
    /// The cancel flag was raised before discovery finished.
    Cancelled,
}

/// Searches for the smallest fuzz that lets each hunk of `diff` match,
/// simulating application along the way so later hunks see earlier edits.
///
/// Per hunk the probe distance grows from 0 to the target length, trying
/// the shifted nominal position, then that far behind, then that far
/// ahead, at a fuzz equal to the distance. The search can be long on large
/// targets, so `cancel` is checked at every probe step.
pub fn calculate_fuzz(
    diff: &Diff,
    target: &[Line],
    config: &ApplyConfig,
    cancel: &CancelFlag,
) -> FuzzOutcome {
    let mut lines = target.to_vec();
    let matching = config.matching();
    let mut shift: isize = 0;
    let mut file_fuzz: Option<usize> = None;

    for hunk in diff.hunks.iter().filter(|h| h.enabled) {
        let nominal = hunk.start(config.reverse) as isize + shift;
        let mut found = None;
        'probe: for distance in 0..=lines.len() {
            let candidates = if distance == 0 {
                vec![0]
            } else {
                vec![0, -(distance as isize), distance as isize]
            };
            for delta in candidates {
                if cancel.is_cancelled() {
                    debug!("fuzz calculation cancelled");
                    return FuzzOutcome::Cancelled;
                }
                let pos = nominal + delta;
                if pos < 0 || pos as usize > lines.len() {
                    continue;
                }
                if let Some(edits) =
                    plan_hunk(hunk, &lines, pos as usize, distance, matching, config.reverse)
                {
                    found = Some((edits, distance, pos - nominal));
                    break 'probe;
                }
            }
        }
        if let Some((edits, distance, offset)) = found {
            trace!("hunk {} needs fuzz {}", hunk.description(), distance);
            execute_edits(&mut lines, &edits);
            shift += offset + hunk.delta(config.reverse);
            file_fuzz = Some(file_fuzz.map_or(distance, |f| f.max(distance)));
        }
    }

    match file_fuzz {
        Some(fuzz) => FuzzOutcome::Fuzz(fuzz),
        None => FuzzOutcome::Unmatched,
    }
}

// --- Reject Generator ---

/// Renders the rejected hunks of a result as unified-format reject text.
///
/// Each rejected hunk gets a synthetic `@@` header rebuilt from its stored
/// ranges (1-based again), followed by its tagged lines verbatim: the
/// marker byte and the content, with the original delimiter when
/// `preserve_endings` is set and the platform separator otherwise. Returns
/// `None` when nothing was rejected; the caller decides whether a `.rej`
/// file gets written.
///
/// The header is rebuilt, not replayed: since parsing clamps the 1-based
/// header values 0 and 1 both to stored position 0, a zero-length range
/// that was written `-1,0` re-renders as `-0,0`. The two forms name the
/// same insertion point.
pub fn generate_reject(
    diff: &Diff,
    result: &FileDiffResult,
    config: &ApplyConfig,
) -> Option<String> {
    let rejected = result.rejected_hunks(diff);
    if rejected.is_empty() {
        return None;
    }
    debug!("rendering {} rejected hunk(s)", rejected.len());

    let mut out = String::new();
    for hunk in rejected {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@",
            start1(hunk.old_start, hunk.old_len),
            hunk.old_len,
            start1(hunk.new_start, hunk.new_len),
            hunk.new_len,
        ));
        out.push_str(if config.preserve_endings {
            "\n"
        } else {
            PLATFORM_SEPARATOR
        });
        for hunk_line in &hunk.lines {
            out.push(hunk_line.tag.marker());
            out.push_str(hunk_line.line.content());
            match (config.preserve_endings, hunk_line.line.ending()) {
                (true, ending) => out.push_str(ending.as_str()),
                (false, LineEnding::None) => {}
                (false, _) => out.push_str(PLATFORM_SEPARATOR),
            }
        }
    }
    Some(out)
}

/// Converts a stored 0-based start back to the 1-based header convention,
/// where an empty range names the line it follows.
fn start1(start: usize, len: usize) -> usize {
    if len == 0 {
        start
    } else {
        start + 1
    }
}
