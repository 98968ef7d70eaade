//! Geometric reasoning over recognized word boxes: grouping words into
//! visual lines, reconstructing reading order, and locating the value
//! that belongs to a keyword.

use regex::Regex;

use recibo_core::{BoundingBox, GeometryConfig, RecognizedWord, SearchDirection};

/// A keyword/value pair located by a spatial rule.
#[derive(Debug, Clone, Copy)]
pub struct SpatialMatch<'a> {
    pub keyword: &'a RecognizedWord,
    pub value: &'a RecognizedWord,
    pub distance: f32,
}

/// Group words into visual lines.
///
/// Words are first ordered by (y1, x1). The first word of each line fixes
/// the line's reference y; every following word within `y_tolerance` of
/// that reference joins the line. Each line is then re-sorted by x1, so
/// slightly staggered tokens still read left to right.
pub fn group_into_lines(words: &[RecognizedWord], y_tolerance: f32) -> Vec<Vec<RecognizedWord>> {
    line_refs(words, y_tolerance)
        .into_iter()
        .map(|line| line.into_iter().cloned().collect())
        .collect()
}

/// Same grouping as [`group_into_lines`], but borrowing from the input
/// slice so callers can hand out references into it.
fn line_refs(words: &[RecognizedWord], y_tolerance: f32) -> Vec<Vec<&RecognizedWord>> {
    let mut sorted: Vec<&RecognizedWord> = words.iter().collect();
    sorted.sort_by(|a, b| {
        a.bbox
            .y1
            .total_cmp(&b.bbox.y1)
            .then(a.bbox.x1.total_cmp(&b.bbox.x1))
    });

    let mut lines: Vec<Vec<&RecognizedWord>> = Vec::new();
    let mut reference_y = f32::NEG_INFINITY;
    for word in sorted {
        if lines.is_empty() || (word.bbox.y1 - reference_y).abs() > y_tolerance {
            reference_y = word.bbox.y1;
            lines.push(vec![word]);
        } else {
            lines.last_mut().unwrap().push(word);
        }
    }
    for line in &mut lines {
        line.sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1));
    }
    lines
}

/// Reconstruct the document text in reading order: top to bottom, left to
/// right within a line.
pub fn reading_order_text(words: &[RecognizedWord], y_tolerance: f32) -> String {
    group_into_lines(words, y_tolerance)
        .iter()
        .map(|line| {
            line.iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate the value associated with a keyword.
///
/// Keywords and candidates are both scanned in reading order: line by
/// line (grouped at `y_tolerance`), left to right within a line. For the
/// first keyword that matches, the first candidate lying in `direction`,
/// within `max_distance` of the keyword's center, and matching `value`
/// when one is given, wins — even if a later candidate sits closer.
pub fn find_value<'a>(
    words: &'a [RecognizedWord],
    keyword: &Regex,
    direction: SearchDirection,
    max_distance: f32,
    value: Option<&Regex>,
    y_tolerance: f32,
) -> Option<SpatialMatch<'a>> {
    let in_order: Vec<&'a RecognizedWord> =
        line_refs(words, y_tolerance).into_iter().flatten().collect();

    for kw in in_order.iter().copied().filter(|w| keyword.is_match(&w.text)) {
        for candidate in in_order.iter().copied() {
            if std::ptr::eq(candidate, kw)
                || !direction.admits(&kw.bbox, &candidate.bbox)
                || !value.map_or(true, |re| re.is_match(&candidate.text))
            {
                continue;
            }
            let distance = kw.bbox.center_distance(&candidate.bbox);
            if distance <= max_distance {
                return Some(SpatialMatch {
                    keyword: kw,
                    value: candidate,
                    distance,
                });
            }
        }
    }
    None
}

/// Words whose box center falls inside `region`, in input order.
pub fn words_in_region<'a>(
    words: &'a [RecognizedWord],
    region: &BoundingBox,
) -> Vec<&'a RecognizedWord> {
    words
        .iter()
        .filter(|w| {
            let (cx, cy) = w.bbox.center();
            region.contains_point(cx, cy)
        })
        .collect()
}

/// Convenience wrapper returning only the matched value text.
pub fn find_value_near(
    words: &[RecognizedWord],
    keyword: &Regex,
    direction: SearchDirection,
    geometry: &GeometryConfig,
) -> Option<String> {
    find_value(
        words,
        keyword,
        direction,
        geometry.default_search_radius,
        None,
        geometry.y_tolerance,
    )
    .map(|m| m.value.text.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recibo_core::BoundingBox;

    fn word(text: &str, x1: f32, y1: f32) -> RecognizedWord {
        RecognizedWord::new(text, BoundingBox::new(x1, y1, x1 + 60.0, y1 + 20.0), 90.0)
    }

    #[test]
    fn two_by_two_grid_groups_into_two_lines() {
        let words = vec![
            word("b", 200.0, 104.0),
            word("d", 200.0, 152.0),
            word("a", 10.0, 100.0),
            word("c", 10.0, 150.0),
        ];
        let lines = group_into_lines(&words, 15.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0][0].text, "a");
        assert_eq!(lines[0][1].text, "b");
        assert_eq!(lines[1][0].text, "c");
        assert_eq!(lines[1][1].text, "d");
    }

    #[test]
    fn tolerance_boundary_splits_lines() {
        // 16px apart with tolerance 15: separate lines.
        let words = vec![word("a", 0.0, 100.0), word("b", 0.0, 116.0)];
        assert_eq!(group_into_lines(&words, 15.0).len(), 2);
        // 15px apart: same line.
        let words = vec![word("a", 0.0, 100.0), word("b", 100.0, 115.0)];
        assert_eq!(group_into_lines(&words, 15.0).len(), 1);
    }

    #[test]
    fn grouping_is_idempotent() {
        let words = vec![
            word("b", 200.0, 104.0),
            word("d", 200.0, 152.0),
            word("a", 10.0, 100.0),
            word("c", 10.0, 150.0),
        ];
        let first = group_into_lines(&words, 15.0);
        assert_eq!(group_into_lines(&words, 15.0), first);
        // Regrouping the flattened result reproduces the same lines.
        let flat: Vec<RecognizedWord> = first.iter().flatten().cloned().collect();
        assert_eq!(group_into_lines(&flat, 15.0), first);
    }

    #[test]
    fn reading_order_is_top_down_left_right() {
        let words = vec![
            word("mundo", 120.0, 10.0),
            word("hola", 10.0, 12.0),
            word("fin", 10.0, 60.0),
        ];
        assert_eq!(reading_order_text(&words, 15.0), "hola mundo\nfin");
    }

    #[test]
    fn find_value_takes_first_admissible_in_reading_order() {
        let kw = word("Monto:", 10.0, 100.0);
        let near = word("210,00", 120.0, 100.0);
        let far = word("999,99", 400.0, 100.0);
        let left = word("888,88", 10.0, 100.0); // same column, excluded
        let words = vec![far.clone(), left, kw, near.clone()];
        let re = Regex::new(r"(?i)^monto").unwrap();
        let m = find_value(&words, &re, SearchDirection::HorizontalRight, 200.0, None, 15.0)
            .unwrap();
        assert_eq!(m.value.text, "210,00");
        assert!(m.distance < 150.0);
    }

    #[test]
    fn reading_order_beats_geometric_proximity() {
        let words = vec![
            word("Referencia:", 10.0, 100.0),
            // Same line, distance 180 from the keyword center.
            word("111111", 190.0, 100.0),
            // Next line, much closer (~67px) but later in reading order.
            word("222222", 40.0, 160.0),
        ];
        let kw_re = Regex::new(r"(?i)referencia").unwrap();
        let val_re = Regex::new(r"^\d{6}$").unwrap();
        let m = find_value(
            &words,
            &kw_re,
            SearchDirection::HorizontalRight,
            200.0,
            Some(&val_re),
            15.0,
        )
        .unwrap();
        assert_eq!(m.value.text, "111111");
    }

    #[test]
    fn find_value_respects_radius_and_value_pattern() {
        let kw = word("Referencia", 10.0, 50.0);
        let noise = word("Banco", 120.0, 50.0);
        let code = word("003899217559", 250.0, 50.0);
        let words = vec![kw, noise, code];
        let kw_re = Regex::new(r"(?i)referencia").unwrap();
        let val_re = Regex::new(r"^\d{6,}$").unwrap();

        let m = find_value(
            &words,
            &kw_re,
            SearchDirection::HorizontalRight,
            400.0,
            Some(&val_re),
            15.0,
        )
        .unwrap();
        assert_eq!(m.value.text, "003899217559");

        // Too small a radius excludes the code.
        assert!(find_value(
            &words,
            &kw_re,
            SearchDirection::HorizontalRight,
            100.0,
            Some(&val_re),
            15.0,
        )
        .is_none());
    }

    #[test]
    fn words_in_region_uses_box_centers() {
        let words = vec![word("dentro", 10.0, 10.0), word("fuera", 500.0, 500.0)];
        let region = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let inside = words_in_region(&words, &region);
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].text, "dentro");
    }

    #[test]
    fn find_value_near_returns_text_only() {
        let words = vec![word("Fecha:", 10.0, 10.0), word("20/06/2025", 120.0, 10.0)];
        let re = Regex::new(r"(?i)fecha").unwrap();
        let got = find_value_near(
            &words,
            &re,
            SearchDirection::HorizontalRight,
            &GeometryConfig::default(),
        );
        assert_eq!(got.as_deref(), Some("20/06/2025"));
    }
}
