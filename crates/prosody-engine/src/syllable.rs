//! Syllable estimation for breath planning.
//!
//! A spelling heuristic, not a pronunciation dictionary. It must stay total and
//! cheap because the planner calls it for every word on the latency path.

/// Approximate the number of syllables in `word`. Always returns at least 1.
///
/// Counts runs of vowels (`y` only after a consonant), counts runs of three or
/// more vowels twice, and drops a silent trailing `e`. Non-letters are ignored.
pub fn estimate_syllables(word: &str) -> u32 {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    if letters.is_empty() {
        return 1;
    }

    let mut runs = 0u32;
    let mut run_len = 0usize;
    let mut prev: Option<char> = None;
    for &c in &letters {
        if is_vowel(c, prev) {
            if run_len == 0 {
                runs += 1;
            }
            run_len += 1;
            if run_len == 3 {
                runs += 1;
            }
        } else {
            run_len = 0;
        }
        prev = Some(c);
    }

    if has_silent_e(&letters) && runs > 1 {
        runs -= 1;
    }
    runs.max(1)
}

/// Sum of `estimate_syllables` over whitespace-separated words.
pub fn estimate_text_syllables(text: &str) -> u32 {
    text.split_whitespace().map(estimate_syllables).sum()
}

fn is_vowel(c: char, prev: Option<char>) -> bool {
    match c {
        'a' | 'e' | 'i' | 'o' | 'u' => true,
        'y' => matches!(prev, Some(p) if !is_plain_vowel(p) && p != 'y'),
        _ => false,
    }
}

fn is_plain_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn has_silent_e(letters: &[char]) -> bool {
    match letters {
        [.., before, 'e'] => !is_plain_vowel(*before) && *before != 'y',
        _ => false,
    }
}
