use indoc::indoc;
use linepatch::{
    apply_diff, apply_diff_with_fuzz, calculate_fuzz, generate_reject, hunk_fits, parse_patch,
    read_lines, render_lines, ApplyConfig, CancelFlag, DiffKind, FuzzFactor, FuzzOutcome,
    HunkKind, HunkResult, LineEnding, LineMatching, LineReader, ParseError, PLATFORM_SEPARATOR,
};

// --- Parsing: unified format ---

#[test]
fn test_parse_simple_unified_diff() {
    let patch_text = indoc! {"
        --- a/src/main.rs\t2024-05-01 10:00:00
        +++ b/src/main.rs\t2024-05-01 10:05:00
        @@ -1,3 +1,3 @@
         fn main() {
        -    println!(\"Hello, world!\");
        +    println!(\"Hello, linepatch!\");
         }
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty());
    assert_eq!(patch.diffs.len(), 1);

    let diff = &patch.diffs[0];
    assert_eq!(diff.old_path.as_deref().unwrap().to_str(), Some("a/src/main.rs"));
    assert_eq!(diff.new_path.as_deref().unwrap().to_str(), Some("b/src/main.rs"));
    assert_eq!(diff.kind(), DiffKind::Change);
    assert_eq!(diff.hunks.len(), 1);

    let hunk = &diff.hunks[0];
    assert_eq!(hunk.old_start, 0);
    assert_eq!(hunk.old_len, 3);
    assert_eq!(hunk.new_len, 3);
    assert_eq!(hunk.kind(), HunkKind::Changed);
    assert_eq!(hunk.lines.len(), 4);
    assert_eq!(hunk.description(), "0,3 -> 0,3");
}

#[test]
fn test_parse_omitted_length_defaults_to_one() {
    let patch_text = indoc! {"
        --- a/file1.txt
        +++ b/file1.txt
        @@ -1 +1 @@
        -foo
        +bar
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty());
    let hunk = &patch.diffs[0].hunks[0];
    assert_eq!((hunk.old_start, hunk.old_len), (0, 1));
    assert_eq!((hunk.new_start, hunk.new_len), (0, 1));
}

#[test]
fn test_parse_garbage_becomes_header_and_project_sticks() {
    let patch_text = indoc! {"
        #P my.project
        Index: greeting.txt
        ===================================================================
        --- greeting.txt\t(revision 4)
        +++ greeting.txt\t(working copy)
        @@ -1 +1 @@
        -hi
        +hello
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty());
    let diff = &patch.diffs[0];
    assert_eq!(diff.project.as_deref(), Some("my.project"));
    assert_eq!(diff.header.len(), 2);
    assert_eq!(diff.header[0].content(), "Index: greeting.txt");
    assert_eq!(diff.old_path.as_deref().unwrap().to_str(), Some("greeting.txt"));
}

#[test]
fn test_parse_dev_null_means_addition_and_deletion() {
    let patch_text = indoc! {"
        --- /dev/null
        +++ b/new.txt
        @@ -0,0 +1,2 @@
        +alpha
        +beta
        --- a/old.txt
        +++ /dev/null
        @@ -1,2 +0,0 @@
        -gamma
        -delta
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty());
    assert_eq!(patch.diffs.len(), 2);
    assert_eq!(patch.diffs[0].kind(), DiffKind::Addition);
    assert!(patch.diffs[0].old_path.is_none());
    assert_eq!(patch.diffs[1].kind(), DiffKind::Deletion);
    assert!(patch.diffs[1].new_path.is_none());
}

#[test]
fn test_parse_no_newline_marker_strips_ending() {
    let patch_text = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-baz\n+qux\n\\ No newline at end of file\n";
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty());
    let hunk = &patch.diffs[0].hunks[0];
    let added = &hunk.lines[1];
    assert_eq!(added.line.content(), "qux");
    assert_eq!(added.line.ending(), LineEnding::None);
}

#[test]
fn test_parse_empty_input_yields_empty_patch() {
    let patch = parse_patch("just some prose\nwith no diff headers\n");
    assert!(patch.is_empty());
    assert!(patch.errors.is_empty());
}

#[test]
fn test_malformed_hunk_header_is_scoped_to_its_diff() {
    let patch_text = indoc! {"
        --- a/broken.txt
        +++ b/broken.txt
        @@ not a real header @@
        -foo
        +bar
        --- a/fine.txt
        +++ b/fine.txt
        @@ -1 +1 @@
        -old
        +new
    "};
    let patch = parse_patch(patch_text);
    assert_eq!(patch.errors.len(), 1);
    assert!(matches!(
        patch.errors[0],
        ParseError::MalformedHunkHeader { line: 3, .. }
    ));
    // The sibling diff is unaffected.
    assert_eq!(patch.diffs.len(), 2);
    assert_eq!(patch.diffs[0].hunks.len(), 0);
    assert_eq!(patch.diffs[1].hunks.len(), 1);
}

// --- Parsing: context format ---

#[test]
fn test_parse_context_diff_unifies_blocks() {
    let patch_text = indoc! {"
        *** a/fruit.txt\t2024-01-01
        --- b/fruit.txt\t2024-01-02
        ***************
        *** 1,4 ****
          apple
        ! banana
        - cherry
          damson
        --- 1,4 ----
          apple
        ! BANANA
        + elderberry
          damson
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty(), "errors: {:?}", patch.errors);
    assert_eq!(patch.diffs.len(), 1);

    let hunk = &patch.diffs[0].hunks[0];
    assert_eq!((hunk.old_start, hunk.old_len), (0, 4));
    assert_eq!((hunk.new_start, hunk.new_len), (0, 4));
    let rendered: Vec<String> = hunk
        .lines
        .iter()
        .map(|hl| format!("{}{}", hl.tag.marker(), hl.line.content()))
        .collect();
    assert_eq!(
        rendered,
        vec![" apple", "-banana", "+BANANA", "-cherry", "+elderberry", " damson"]
    );

    // The unified hunk applies like its unified-format equivalent.
    let target = read_lines("apple\nbanana\ncherry\ndamson\n");
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(
        result.after_text(true),
        "apple\nBANANA\nelderberry\ndamson\n"
    );
}

#[test]
fn test_parse_context_diff_with_omitted_new_block() {
    let patch_text = indoc! {"
        *** a/del.txt
        --- b/del.txt
        ***************
        *** 1,3 ****
          keep
        - drop
          keep2
        --- 1,2 ----
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty(), "errors: {:?}", patch.errors);
    let diff = &patch.diffs[0];
    assert_eq!(diff.hunks.len(), 1);

    let target = read_lines("keep\ndrop\nkeep2\n");
    let result = apply_diff(diff, &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "keep\nkeep2\n");
}

#[test]
fn test_context_format_no_newline_marker_in_both_blocks() {
    let patch_text = indoc! {"
        *** a/end.txt
        --- b/end.txt
        ***************
        *** 1,2 ****
          keep
        - old
        \\ No newline at end of file
        --- 1,2 ----
          keep
        + new
        \\ No newline at end of file
    "};
    let patch = parse_patch(patch_text);
    assert!(patch.errors.is_empty(), "errors: {:?}", patch.errors);

    let hunk = &patch.diffs[0].hunks[0];
    assert_eq!(hunk.lines[1].line.content(), "old");
    assert_eq!(hunk.lines[1].line.ending(), LineEnding::None);
    assert_eq!(hunk.lines[2].line.content(), "new");
    assert_eq!(hunk.lines[2].line.ending(), LineEnding::None);

    let config = ApplyConfig::builder().preserve_endings(true).build();
    let result = apply_diff(&patch.diffs[0], &read_lines("keep\nold"), &config);
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "keep\nnew");
}

#[test]
fn test_inconsistent_context_is_an_error_but_siblings_survive() {
    let patch_text = indoc! {"
        *** a/x.txt
        --- b/x.txt
        ***************
        *** 1,2 ****
          alpha
        ! beta
        --- 1,2 ----
          ALPHA
        ! BETA
        --- a/y.txt
        +++ b/y.txt
        @@ -1 +1 @@
        -one
        +uno
    "};
    let patch = parse_patch(patch_text);
    assert_eq!(patch.errors.len(), 1);
    assert!(matches!(
        patch.errors[0],
        ParseError::InconsistentContext { .. }
    ));
    assert_eq!(patch.diffs.len(), 2);
    assert_eq!(patch.diffs[1].hunks.len(), 1);
}

// --- Line reader ---

#[test]
fn test_line_reader_round_trips_mixed_endings() {
    let text = "unix\nwindows\r\nunterminated";
    let lines = read_lines(text);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0].ending(), LineEnding::Lf);
    assert_eq!(lines[1].ending(), LineEnding::CrLf);
    assert_eq!(lines[2].ending(), LineEnding::None);
    assert_eq!(render_lines(&lines, true), text);

    let normalized = render_lines(&lines, false);
    assert_eq!(
        normalized,
        format!("unix{0}windows{0}unterminated", PLATFORM_SEPARATOR)
    );
}

#[test]
fn test_line_reader_split_on_cr() {
    let text = "a\rb\n";
    let merged = read_lines(text);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].content(), "a\rb");

    let split: Vec<_> = LineReader::new(text).split_on_cr(true).collect();
    assert_eq!(split.len(), 2);
    assert_eq!(split[0].content(), "a");
    assert_eq!(split[0].ending(), LineEnding::Cr);
    assert_eq!(split[1].content(), "b");
}

// --- Applying ---

fn single_change_patch() -> linepatch::Patch {
    parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,3 @@
         a
        -b
        +B
         c
    "})
}

#[test]
fn test_apply_change_in_middle() {
    let patch = single_change_patch();
    let diff = &patch.diffs[0];
    assert_eq!(diff.hunks[0].delta(false), 0);

    let target = read_lines("a\nb\nc\n");
    let result = apply_diff(diff, &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.fuzz, 0);
    assert_eq!(
        result.hunk_results[0],
        HunkResult::Applied {
            fuzz: 0,
            offset: 0,
            shift: 0
        }
    );
    assert_eq!(result.after_text(true), "a\nB\nc\n");
    // The input lines are untouched.
    assert_eq!(render_lines(&target, true), "a\nb\nc\n");
}

#[test]
fn test_context_only_hunk_round_trips_delimiters() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,3 @@
         a
         b
         c
    "});
    assert!(patch.errors.is_empty());
    assert_eq!(patch.diffs[0].hunks[0].kind(), HunkKind::Unknown);

    // A hunk that changes nothing must reproduce the target byte for
    // byte, whatever delimiters it carries.
    let original = "a\r\nb\nc";
    let target = read_lines(original);
    let config = ApplyConfig::builder().preserve_endings(true).build();
    let result = apply_diff(&patch.diffs[0], &target, &config);
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), original);
    assert_eq!(result.after, target);
}

#[test]
fn test_apply_preserves_untouched_delimiters() {
    let patch = single_change_patch();
    let config = ApplyConfig::builder().preserve_endings(true).build();

    // CRLF context lines are matched despite the patch using LF, and keep
    // their exact delimiters in the output.
    let target = read_lines("a\r\nb\r\nc\r\n");
    let result = apply_diff(&patch.diffs[0], &target, &config);
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "a\r\nB\nc\r\n");
}

#[test]
fn test_double_application_rejects_cleanly() {
    let patch = single_change_patch();
    let config = ApplyConfig::default();

    let target = read_lines("a\nb\nc\n");
    let first = apply_diff(&patch.diffs[0], &target, &config);
    assert!(first.all_applied());

    let second = apply_diff(&patch.diffs[0], &first.after, &config);
    assert!(!second.all_applied());
    assert_eq!(second.hunk_results[0], HunkResult::Rejected);
    // A failed application leaves the target untouched.
    assert_eq!(second.after_text(true), first.after_text(true));
}

#[test]
fn test_reverse_round_trip_is_byte_exact() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,4 @@
         one
        -two
        +deux
        +zwei
         three
    "});
    let forward = ApplyConfig::builder().preserve_endings(true).build();
    let reverse = ApplyConfig::builder()
        .preserve_endings(true)
        .reverse(true)
        .build();

    let original = "one\ntwo\nthree\n";
    let patched = apply_diff(&patch.diffs[0], &read_lines(original), &forward);
    assert!(patched.all_applied());
    assert_eq!(patched.after_text(true), "one\ndeux\nzwei\nthree\n");

    let restored = apply_diff(&patch.diffs[0], &patched.after, &reverse);
    assert!(restored.all_applied());
    assert_eq!(restored.after_text(true), original);
}

#[test]
fn test_pure_insertion_lands_after_named_line() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -2,0 +3,2 @@
        +X
        +Y
    "});
    let target = read_lines("a\nb\nc\nd\n");
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "a\nb\nX\nY\nc\nd\n");
}

#[test]
fn test_file_creation_from_empty_target() {
    let patch = parse_patch(indoc! {"
        --- /dev/null
        +++ b/new.txt
        @@ -0,0 +1,2 @@
        +alpha
        +beta
    "});
    let result = apply_diff(&patch.diffs[0], &read_lines(""), &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "alpha\nbeta\n");
}

#[test]
fn test_file_deletion_empties_target() {
    let patch = parse_patch(indoc! {"
        --- a/old.txt
        +++ /dev/null
        @@ -1,2 +0,0 @@
        -gamma
        -delta
    "});
    let result = apply_diff(
        &patch.diffs[0],
        &read_lines("gamma\ndelta\n"),
        &ApplyConfig::default(),
    );
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "");
}

#[test]
fn test_ignore_whitespace_matching() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,3 @@
         hello
        -world
        +mars
         bye
    "});
    let target = read_lines("  hello  \n\tworld\nbye\n");

    let strict = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(!strict.all_applied());

    let lax = ApplyConfig::builder().ignore_whitespace(true).build();
    let result = apply_diff(&patch.diffs[0], &target, &lax);
    assert!(result.all_applied());
    assert_eq!(result.after_text(true), "  hello  \nmars\nbye\n");
}

// --- Fuzz and shift ---

#[test]
fn test_interior_edited_context_needs_fuzz_one() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,5 +1,5 @@
         one
         two
        -three
        +THREE
         four
         five
    "});
    // The second context line was edited out from under the patch.
    let target = read_lines("one\nTWO\nthree\nfour\nfive\n");

    let exact = ApplyConfig::builder().fuzz(FuzzFactor::Limit(0)).build();
    let rejected = apply_diff(&patch.diffs[0], &target, &exact);
    assert!(!rejected.all_applied());

    let fuzzy = ApplyConfig::builder().fuzz(FuzzFactor::Limit(1)).build();
    let result = apply_diff(&patch.diffs[0], &target, &fuzzy);
    assert!(result.all_applied());
    assert!(result.hunk_results[0].is_fuzzy());
    assert_eq!(result.fuzz, 1);
    assert_eq!(result.after_text(true), "one\nTWO\nTHREE\nfour\nfive\n");
}

#[test]
fn test_offset_tolerance_without_fuzz_damage() {
    let patch = single_change_patch();
    // Two extra lines were inserted above the hunk's stated position.
    let target = read_lines("x\ny\na\nb\nc\n");
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(
        result.hunk_results[0],
        HunkResult::Applied {
            fuzz: 2,
            offset: 2,
            shift: 0
        }
    );
    assert_eq!(result.after_text(true), "x\ny\na\nB\nc\n");
}

fn shifted_two_hunk_fixture() -> (linepatch::Patch, Vec<linepatch::Line>) {
    let patch = parse_patch(indoc! {"
        --- a/big.txt
        +++ b/big.txt
        @@ -9,2 +9,5 @@
         line 9
        +A
        +B
        +C
         line 10
        @@ -50,2 +53,3 @@
         filler
        +X
         filler
    "});
    assert!(patch.errors.is_empty());

    let mut content = String::new();
    for i in 1..=44 {
        content.push_str(&format!("line {}\n", i));
    }
    for _ in 45..=60 {
        content.push_str("filler\n");
    }
    (patch, read_lines(&content))
}

#[test]
fn test_shift_carries_earlier_deltas_forward() {
    let (patch, target) = shifted_two_hunk_fixture();
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());

    // The first hunk added three lines, so the second starts its search
    // three lines down and matches there without any offset.
    assert_eq!(
        result.hunk_results[1],
        HunkResult::Applied {
            fuzz: 0,
            offset: 0,
            shift: 3
        }
    );
    let x_at = result
        .after
        .iter()
        .position(|l| l.content() == "X")
        .unwrap();
    assert_eq!(x_at, 53);
}

#[test]
fn test_disabled_shift_uses_unshifted_positions() {
    let (patch, target) = shifted_two_hunk_fixture();
    let config = ApplyConfig::builder().adjust_shift(false).build();
    let result = apply_diff(&patch.diffs[0], &target, &config);
    assert!(result.all_applied());

    assert_eq!(
        result.hunk_results[1],
        HunkResult::Applied {
            fuzz: 0,
            offset: 0,
            shift: 0
        }
    );
    // Without shift adjustment the second hunk lands at its stated
    // position, three lines above where the drifted content really is.
    let x_at = result
        .after
        .iter()
        .position(|l| l.content() == "X")
        .unwrap();
    assert_eq!(x_at, 50);
}

#[test]
fn test_disabled_hunks_are_skipped_not_rejected() {
    let mut patch = single_change_patch();
    patch.diffs[0].hunks[0].enabled = false;

    let target = read_lines("a\nb\nc\n");
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.hunk_results[0], HunkResult::Skipped);
    assert_eq!(result.after_text(true), "a\nb\nc\n");
}

#[test]
fn test_hunk_fits_is_read_only_probe() {
    let patch = single_change_patch();
    let hunk = &patch.diffs[0].hunks[0];
    let target = read_lines("a\nb\nc\n");
    assert!(hunk_fits(
        hunk,
        &target,
        0,
        0,
        LineMatching::IgnoreEndings,
        false
    ));
    assert!(!hunk_fits(
        hunk,
        &target,
        1,
        0,
        LineMatching::IgnoreEndings,
        false
    ));
}

// --- Auto fuzz ---

#[test]
fn test_calculate_fuzz_finds_smallest_budget() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,5 +1,5 @@
         one
         two
        -three
        +THREE
         four
         five
    "});
    let target = read_lines("one\nTWO\nthree\nfour\nfive\n");
    let cancel = CancelFlag::new();
    let outcome = calculate_fuzz(&patch.diffs[0], &target, &ApplyConfig::default(), &cancel);
    assert_eq!(outcome, FuzzOutcome::Fuzz(1));

    // FuzzFactor::Auto feeds the discovered budget straight into apply.
    let auto = ApplyConfig::builder().fuzz(FuzzFactor::Auto).build();
    let result = apply_diff(&patch.diffs[0], &target, &auto);
    assert!(result.all_applied());
    assert_eq!(result.fuzz, 1);
}

#[test]
fn test_calculate_fuzz_unmatched_when_deletes_never_match() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,3 @@
         a
        -never present
        +replacement
         c
    "});
    let target = read_lines("a\nb\nc\n");
    let cancel = CancelFlag::new();
    let outcome = calculate_fuzz(&patch.diffs[0], &target, &ApplyConfig::default(), &cancel);
    assert_eq!(outcome, FuzzOutcome::Unmatched);
}

#[test]
fn test_calculate_fuzz_honors_cancellation() {
    let patch = single_change_patch();
    let target = read_lines("a\nb\nc\n");
    let cancel = CancelFlag::new();
    cancel.cancel();
    let outcome = calculate_fuzz(&patch.diffs[0], &target, &ApplyConfig::default(), &cancel);
    assert_eq!(outcome, FuzzOutcome::Cancelled);
}

// --- Rejects ---

#[test]
fn test_reject_reproduces_hunk_exactly() {
    let patch = parse_patch(indoc! {"
        --- a/t.txt
        +++ b/t.txt
        @@ -1,3 +1,3 @@
         a
        -b
        +B
         c
        @@ -10,3 +10,3 @@
         p
        -q
        +Q
         r
    "});
    let config = ApplyConfig::builder().preserve_endings(true).build();
    // Only the first hunk's region exists; the second has nothing to match.
    let target = read_lines("a\nb\nc\n");
    let result = apply_diff(&patch.diffs[0], &target, &config);
    assert!(result.hunk_results[0].is_applied());
    assert_eq!(result.hunk_results[1], HunkResult::Rejected);

    let reject = generate_reject(&patch.diffs[0], &result, &config).unwrap();
    assert_eq!(reject, "@@ -10,3 +10,3 @@\n p\n-q\n+Q\n r\n");
}

#[test]
fn test_no_reject_when_everything_applies() {
    let patch = single_change_patch();
    let config = ApplyConfig::default();
    let target = read_lines("a\nb\nc\n");
    let result = apply_diff(&patch.diffs[0], &target, &config);
    assert!(result.all_applied());
    assert!(generate_reject(&patch.diffs[0], &result, &config).is_none());
}

// --- Model operations ---

#[test]
fn test_target_path_strips_components_but_keeps_file_name() {
    let patch = single_change_patch();
    let diff = &patch.diffs[0];
    assert_eq!(diff.target_path(0, false).unwrap().to_str(), Some("a/t.txt"));
    assert_eq!(diff.target_path(1, false).unwrap().to_str(), Some("t.txt"));
    // Stripping more components than exist still keeps the file name.
    assert_eq!(diff.target_path(9, false).unwrap().to_str(), Some("t.txt"));
    // Under reverse the new side is the target.
    assert_eq!(diff.target_path(0, true).unwrap().to_str(), Some("b/t.txt"));
}

#[test]
fn test_retarget_hunk_keeps_destination_ordered() {
    let mut patch = parse_patch(indoc! {"
        --- a/one.txt
        +++ b/one.txt
        @@ -20,3 +20,3 @@
         p
        -q
        +Q
         r
        --- a/two.txt
        +++ b/two.txt
        @@ -1,3 +1,3 @@
         x
        -y
        +Y
         z
        @@ -40,3 +40,3 @@
         u
        -v
        +V
         w
    "});
    assert!(patch.errors.is_empty());

    // Move the hunk of the first diff into the second.
    patch.retarget_hunk(0, 0, 1).unwrap();
    assert!(patch.diffs[0].hunks.is_empty());
    let starts: Vec<usize> = patch.diffs[1].hunks.iter().map(|h| h.old_start).collect();
    assert_eq!(starts, vec![0, 19, 39]);

    // Out-of-bounds indexes are refused.
    assert!(patch.retarget_hunk(0, 0, 1).is_none());
    assert!(patch.retarget_hunk(0, 0, 5).is_none());
}

#[test]
fn test_hunk_invert_round_trip() {
    let patch = single_change_patch();
    let hunk = &patch.diffs[0].hunks[0];
    let inverted = hunk.invert();
    assert_eq!(inverted.old_start, hunk.new_start);
    assert_eq!(inverted.kind(), HunkKind::Changed);
    assert_eq!(&inverted.invert(), hunk);
}

#[test]
fn test_manual_content_overrides_hunk_matching() {
    let mut patch = single_change_patch();
    patch.diffs[0].manual_content = Some("hand\nmerged\n".to_string());

    let target = read_lines("a\nb\nc\n");
    let result = apply_diff(&patch.diffs[0], &target, &ApplyConfig::default());
    assert!(result.all_applied());
    assert_eq!(result.hunk_results[0], HunkResult::Skipped);
    assert_eq!(result.after_text(true), "hand\nmerged\n");
}

#[test]
fn test_explicit_fuzz_limit_overrides_config() {
    let patch = single_change_patch();
    // Context damaged right next to the change.
    let target = read_lines("A\nb\nc\n");
    let config = ApplyConfig::builder().fuzz(FuzzFactor::Limit(0)).build();

    let strict = apply_diff_with_fuzz(&patch.diffs[0], &target, &config, 0);
    assert!(!strict.all_applied());

    let fuzzy = apply_diff_with_fuzz(&patch.diffs[0], &target, &config, 1);
    assert!(fuzzy.all_applied());
    assert_eq!(fuzzy.after_text(true), "A\nB\nc\n");
}
