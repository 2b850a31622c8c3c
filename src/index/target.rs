// Choosing the canonical navigation target among competing candidates

use super::Location;

/// What kind of site a candidate location is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CandidateKind {
    Definition,
    Declaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub location: Location,
    pub kind: CandidateKind,
}

impl Candidate {
    pub fn definition(location: Location) -> Self {
        Self {
            location,
            kind: CandidateKind::Definition,
        }
    }

    pub fn declaration(location: Location) -> Self {
        Self {
            location,
            kind: CandidateKind::Declaration,
        }
    }
}

/// Pick the target an occurrence should navigate to.
///
/// Definitions beat declarations; then a candidate in the occurrence's own
/// file beats one elsewhere; then the smallest location wins. The
/// occurrence itself and null locations are never chosen. The result only
/// depends on the candidate set, not on its iteration order.
pub fn best_target<I>(occurrence: Option<Location>, candidates: I) -> Option<Location>
where
    I: IntoIterator<Item = Candidate>,
{
    let file_id = occurrence.map(|loc| loc.file_id());

    candidates
        .into_iter()
        .filter(|c| !c.location.is_null() && Some(c.location) != occurrence)
        .min_by_key(|c| {
            let other_file = Some(c.location.file_id()) != file_id;
            (c.kind, other_file, c.location)
        })
        .map(|c| c.location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_beats_declaration() {
        let decl = Candidate::declaration(Location::new(1, 10));
        let def = Candidate::definition(Location::new(2, 50));
        assert_eq!(
            best_target(Some(Location::new(1, 99)), [decl, def]),
            Some(Location::new(2, 50))
        );
    }

    #[test]
    fn test_same_file_definition_wins() {
        let far = Candidate::definition(Location::new(1, 5));
        let near = Candidate::definition(Location::new(3, 500));
        assert_eq!(
            best_target(Some(Location::new(3, 10)), [far, near]),
            Some(Location::new(3, 500))
        );
    }

    #[test]
    fn test_earliest_location_breaks_ties() {
        let a = Candidate::definition(Location::new(4, 20));
        let b = Candidate::definition(Location::new(2, 90));
        let c = Candidate::definition(Location::new(2, 30));
        assert_eq!(
            best_target(Some(Location::new(9, 0)), [a, b, c]),
            Some(Location::new(2, 30))
        );
        assert_eq!(best_target(None, [c, a, b]), Some(Location::new(2, 30)));
    }

    #[test]
    fn test_occurrence_never_targets_itself() {
        let only = Candidate::declaration(Location::new(1, 1));
        assert_eq!(best_target(Some(Location::new(1, 1)), [only]), None);
        assert_eq!(best_target(None, []), None);
        assert_eq!(
            best_target(None, [Candidate::definition(Location::NULL)]),
            None
        );
    }

    #[test]
    fn test_stable_across_orderings() {
        let candidates = [
            Candidate::declaration(Location::new(1, 1)),
            Candidate::definition(Location::new(5, 5)),
            Candidate::definition(Location::new(3, 3)),
        ];
        let mut reversed = candidates;
        reversed.reverse();
        let occurrence = Some(Location::new(5, 100));
        assert_eq!(
            best_target(occurrence, candidates),
            best_target(occurrence, reversed)
        );
    }
}
