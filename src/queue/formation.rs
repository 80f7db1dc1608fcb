//! Team assignment and region selection for a formed match

use crate::types::{PlayerId, PlayerRef, Team};
use std::collections::{BTreeMap, HashMap};

/// Split players into teams by position
///
/// The first `ceil(n / 2)` players in the given order go to red, the rest to blue.
pub fn assign_teams(players: &[PlayerRef]) -> BTreeMap<PlayerId, Team> {
    let red_size = players.len().div_ceil(2);

    players
        .iter()
        .enumerate()
        .map(|(position, player)| {
            let team = if position < red_size {
                Team::Red
            } else {
                Team::Blue
            };
            (player.id.clone(), team)
        })
        .collect()
}

/// Pick the match region by majority vote over the players' hints
///
/// Blank or absent hints do not vote. When nobody votes, or the top count is
/// shared by more than one region, `default_region` wins.
pub fn select_region(players: &[PlayerRef], default_region: &str) -> String {
    let mut votes: HashMap<&str, usize> = HashMap::new();
    for hint in players.iter().filter_map(|p| p.region.as_deref()) {
        let hint = hint.trim();
        if !hint.is_empty() {
            *votes.entry(hint).or_insert(0) += 1;
        }
    }

    let Some(top) = votes.values().copied().max() else {
        return default_region.to_string();
    };

    let mut leaders = votes.iter().filter(|(_, count)| **count == top);
    match (leaders.next(), leaders.next()) {
        (Some((region, _)), None) => (*region).to_string(),
        _ => default_region.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players_with_regions(hints: &[Option<&str>]) -> Vec<PlayerRef> {
        hints
            .iter()
            .enumerate()
            .map(|(i, hint)| {
                let player = PlayerRef::new(format!("p{}", i), format!("Player {}", i));
                match hint {
                    Some(region) => player.with_region(*region),
                    None => player,
                }
            })
            .collect()
    }

    #[test]
    fn test_eight_players_split_four_four() {
        let players = players_with_regions(&[None; 8]);
        let teams = assign_teams(&players);

        for (i, player) in players.iter().enumerate() {
            let expected = if i < 4 { Team::Red } else { Team::Blue };
            assert_eq!(teams[&player.id], expected);
        }
    }

    #[test]
    fn test_odd_count_gives_red_the_extra_player() {
        let players = players_with_regions(&[None; 5]);
        let teams = assign_teams(&players);

        let red = teams.values().filter(|t| **t == Team::Red).count();
        assert_eq!(red, 3);
        assert_eq!(teams.len() - red, 2);
        assert!(assign_teams(&[]).is_empty());
    }

    #[test]
    fn test_majority_region_wins() {
        let players = players_with_regions(&[
            Some("Sydney"),
            Some("Sydney"),
            Some("Perth"),
            Some("Sydney"),
            None,
            Some("Melbourne"),
            Some("Sydney"),
            Some("Perth"),
        ]);
        assert_eq!(select_region(&players, "Sydney"), "Sydney");
        assert_eq!(select_region(&players, "Singapore"), "Sydney");
    }

    #[test]
    fn test_tie_falls_back_to_default() {
        let players = players_with_regions(&[
            Some("Perth"),
            Some("Perth"),
            Some("Melbourne"),
            Some("Melbourne"),
        ]);
        assert_eq!(select_region(&players, "Sydney"), "Sydney");
    }

    #[test]
    fn test_no_hints_uses_default() {
        let players = players_with_regions(&[None, Some(""), Some("   "), None]);
        assert_eq!(select_region(&players, "Sydney"), "Sydney");
    }

    #[test]
    fn test_hints_are_trimmed() {
        let players = players_with_regions(&[Some(" Perth"), Some("Perth "), Some("Sydney")]);
        assert_eq!(select_region(&players, "Sydney"), "Perth");
    }
}
