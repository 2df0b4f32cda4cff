use lotto_types::{NumberSet, NUMBERS_PER_SET};

/// Number of values present in both sets.
///
/// Both canonical forms are sorted, so a single merge pass counts the intersection.
pub fn match_count(ticket: &NumberSet, winning: &NumberSet) -> u8 {
    let (a, b) = (ticket.canonical(), winning.canonical());
    let (mut i, mut j, mut count) = (0, 0, 0u8);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

/// Winners per match count (index = matches).
pub fn tally<'a, I>(tickets: I, winning: &NumberSet) -> [u64; NUMBERS_PER_SET + 1]
where
    I: IntoIterator<Item = &'a NumberSet>,
{
    let mut counts = [0u64; NUMBERS_PER_SET + 1];
    for numbers in tickets {
        counts[match_count(numbers, winning) as usize] += 1;
    }
    counts
}
