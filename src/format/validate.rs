//! # Format validation.
//!
//! Runs every structural check on a parsed [`Format`] and returns the **first**
//! violation. A format that fails here never reaches the catalog.
//!
//! ## Checks (in order)
//! ```text
//! id / schematic non-empty
//! rooms: at least one, unique ids, bounds min <= max
//! exits: known targets
//! graph: every room reachable from the entry room (edges taken undirected)
//! graph: no directed cycle unless allow_loops
//! doors: unique ids, known room, required_keys <= key capacity
//! mobs : count >= 1, room total <= MOB_LIMIT, radius finite and >= 0,
//!        kind resolvable by the host
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::FormatError;
use crate::host::EntityKinds;

use super::model::{Format, RoomTemplate};

pub(crate) fn validate(f: &Format, kinds: &dyn EntityKinds) -> Result<(), FormatError> {
    if f.id.trim().is_empty() {
        return Err(FormatError::EmptyId);
    }
    let format = || f.id.clone();
    if f.schematic.trim().is_empty() {
        return Err(FormatError::EmptySchematic { format: format() });
    }
    if f.rooms.is_empty() {
        return Err(FormatError::NoRooms { format: format() });
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(f.rooms.len());
    for (i, room) in f.rooms.iter().enumerate() {
        if index.insert(room.id.as_str(), i).is_some() {
            return Err(FormatError::DuplicateRoom {
                format: format(),
                room: room.id.clone(),
            });
        }
    }

    if let Some(room) = f.rooms.iter().find(|r| r.bounds.is_some_and(|b| b.is_empty())) {
        return Err(FormatError::InvertedBounds {
            format: format(),
            room: room.id.clone(),
        });
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); f.rooms.len()];
    for (i, room) in f.rooms.iter().enumerate() {
        for exit in &room.exits {
            let Some(&to) = index.get(exit.as_str()) else {
                return Err(FormatError::UnknownExit {
                    format: format(),
                    room: room.id.clone(),
                    exit: exit.clone(),
                });
            };
            edges[i].push(to);
        }
    }

    if let Some(i) = unreachable_room(&edges) {
        return Err(FormatError::Disconnected {
            format: format(),
            room: f.rooms[i].id.clone(),
        });
    }
    if !f.allow_loops {
        if let Some(i) = cycle_entry(&edges) {
            return Err(FormatError::Cycle {
                format: format(),
                room: f.rooms[i].id.clone(),
            });
        }
    }

    let capacity = f.key_capacity();
    let mut doors: HashSet<&str> = HashSet::with_capacity(f.doors.len());
    for door in &f.doors {
        if !doors.insert(door.id.as_str()) {
            return Err(FormatError::DuplicateDoor {
                format: format(),
                door: door.id.clone(),
            });
        }
        if !index.contains_key(door.room.as_str()) {
            return Err(FormatError::DoorRoom {
                format: format(),
                door: door.id.clone(),
                room: door.room.clone(),
            });
        }
        if door.required_keys > capacity {
            return Err(FormatError::KeyPool {
                format: format(),
                door: door.id.clone(),
                required: door.required_keys,
                available: capacity,
            });
        }
    }

    for room in &f.rooms {
        let count = room.mob_count();
        if count > RoomTemplate::MOB_LIMIT {
            return Err(FormatError::TooManyMobs {
                format: format(),
                room: room.id.clone(),
                count,
                limit: RoomTemplate::MOB_LIMIT,
            });
        }
        for mob in &room.mobs {
            if !mob.radius.is_finite() || mob.radius < 0.0 {
                return Err(FormatError::BadRadius {
                    format: format(),
                    room: room.id.clone(),
                    kind: mob.kind.clone(),
                });
            }
            if mob.count == 0 {
                return Err(FormatError::ZeroCount {
                    format: format(),
                    room: room.id.clone(),
                    kind: mob.kind.clone(),
                });
            }
            if !kinds.resolves(&mob.kind) {
                return Err(FormatError::UnknownEntityKind {
                    format: format(),
                    room: room.id.clone(),
                    kind: mob.kind.clone(),
                });
            }
        }
    }

    Ok(())
}

/// First room not reachable from room 0, ignoring edge direction.
fn unreachable_room(edges: &[Vec<usize>]) -> Option<usize> {
    let n = edges.len();
    let mut undirected: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, tos) in edges.iter().enumerate() {
        for &to in tos {
            undirected[from].push(to);
            undirected[to].push(from);
        }
    }

    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([0usize]);
    seen[0] = true;
    while let Some(at) = queue.pop_front() {
        for &next in &undirected[at] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    seen.iter().position(|s| !s)
}

/// A room on some directed cycle, if any.
fn cycle_entry(edges: &[Vec<usize>]) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    let n = edges.len();
    let mut mark = vec![Mark::New; n];
    for start in 0..n {
        if mark[start] != Mark::New {
            continue;
        }
        // Iterative DFS: (node, next edge index).
        let mut stack = vec![(start, 0usize)];
        mark[start] = Mark::Open;
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let next = edges[node].get(top.1).copied();
            top.1 += 1;
            if let Some(next) = next {
                match mark[next] {
                    Mark::Open => return Some(next),
                    Mark::New => {
                        mark[next] = Mark::Open;
                        stack.push((next, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                mark[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AnyKind;

    fn parse(json: &str) -> Format {
        serde_json::from_str(json).unwrap()
    }

    fn check(json: &str) -> Result<(), FormatError> {
        validate(&parse(json), &AnyKind)
    }

    #[test]
    fn test_linear_graph_is_valid() {
        let ok = check(
            r#"{"id":"f","schematic":"s","rooms":[
                {"id":"a","exits":["b"]},{"id":"b","exits":["c"]},{"id":"c"}]}"#,
        );
        assert_eq!(ok, Ok(()));
    }

    #[test]
    fn test_rejects_empty_identity() {
        assert_eq!(
            check(r#"{"id":" ","schematic":"s","rooms":[{"id":"a"}]}"#),
            Err(FormatError::EmptyId)
        );
        assert_eq!(
            check(r#"{"id":"f","schematic":"","rooms":[{"id":"a"}]}"#).unwrap_err().as_label(),
            "format_empty_schematic"
        );
        assert_eq!(
            check(r#"{"id":"f","schematic":"s"}"#).unwrap_err().as_label(),
            "format_no_rooms"
        );
    }

    #[test]
    fn test_rejects_duplicate_room_and_unknown_exit() {
        let dup = check(r#"{"id":"f","schematic":"s","rooms":[{"id":"a"},{"id":"a"}]}"#);
        assert_eq!(dup.unwrap_err().as_label(), "format_duplicate_room");

        let exit = check(r#"{"id":"f","schematic":"s","rooms":[{"id":"a","exits":["zz"]}]}"#);
        assert_eq!(
            exit,
            Err(FormatError::UnknownExit {
                format: "f".into(),
                room: "a".into(),
                exit: "zz".into()
            })
        );
    }

    #[test]
    fn test_rejects_disconnected_room() {
        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[
                {"id":"a","exits":["b"]},{"id":"b"},{"id":"island"}]}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            FormatError::Disconnected {
                format: "f".into(),
                room: "island".into()
            }
        );
    }

    #[test]
    fn test_back_edge_counts_for_connectivity() {
        // b only points back at a; still connected.
        let ok = check(
            r#"{"id":"f","schematic":"s","allow_loops":true,"rooms":[
                {"id":"a"},{"id":"b","exits":["a"]}]}"#,
        );
        assert_eq!(ok, Ok(()));
    }

    #[test]
    fn test_cycles_need_allow_loops() {
        let looped = r#"{"id":"f","schematic":"s","allow_loops":LOOPS,"rooms":[
            {"id":"a","exits":["b"]},{"id":"b","exits":["c"]},{"id":"c","exits":["a"]}]}"#;
        let err = check(&looped.replace("LOOPS", "false")).unwrap_err();
        assert_eq!(err.as_label(), "format_cycle");
        assert_eq!(check(&looped.replace("LOOPS", "true")), Ok(()));

        let self_loop = check(r#"{"id":"f","schematic":"s","rooms":[{"id":"a","exits":["a"]}]}"#);
        assert_eq!(self_loop.unwrap_err().as_label(), "format_cycle");
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let ok = check(
            r#"{"id":"f","schematic":"s","rooms":[
                {"id":"a","exits":["b","c"]},{"id":"b","exits":["d"]},
                {"id":"c","exits":["d"]},{"id":"d"}]}"#,
        );
        assert_eq!(ok, Ok(()));
    }

    #[test]
    fn test_door_must_fit_key_pool() {
        let base = r#"{"id":"f","schematic":"s","bonus_keys":BONUS,
            "rooms":[{"id":"a","key_drop":"marked_mob_kill",
                      "mobs":[{"kind":"zombie","count":2,"marked":true},{"kind":"spider","count":5}]}],
            "doors":[{"id":"gate","room":"a","required_keys":3}]}"#;

        let err = check(&base.replace("BONUS", "0")).unwrap_err();
        assert_eq!(
            err,
            FormatError::KeyPool {
                format: "f".into(),
                door: "gate".into(),
                required: 3,
                available: 2
            }
        );
        assert_eq!(check(&base.replace("BONUS", "1")), Ok(()));
    }

    #[test]
    fn test_door_room_and_duplicates() {
        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a"}],
                "doors":[{"id":"d","room":"nope","required_keys":0}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "format_door_room");

        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a"}],
                "doors":[{"id":"d","room":"a","required_keys":0},{"id":"d","room":"a","required_keys":0}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "format_duplicate_door");
    }

    #[test]
    fn test_mob_kind_must_resolve() {
        let f = parse(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a","mobs":[{"kind":"dragon"}]}]}"#,
        );
        let only_zombies = |k: &str| k == "zombie";
        assert_eq!(
            validate(&f, &only_zombies),
            Err(FormatError::UnknownEntityKind {
                format: "f".into(),
                room: "a".into(),
                kind: "dragon".into()
            })
        );

        let zero = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a","mobs":[{"kind":"zombie","count":0}]}]}"#,
        );
        assert_eq!(zero.unwrap_err().as_label(), "format_zero_count");
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a",
                "bounds":{"min":{"x":10,"y":0,"z":0},"max":{"x":0,"y":5,"z":5}}}]}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            FormatError::InvertedBounds {
                format: "f".into(),
                room: "a".into()
            }
        );

        let flat = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a",
                "bounds":{"min":{"x":0,"y":1,"z":0},"max":{"x":4,"y":1,"z":4}}}]}"#,
        );
        assert_eq!(flat, Ok(()), "a single-layer box is still a box");
    }

    #[test]
    fn test_rejects_bad_radius() {
        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a","mobs":[{"kind":"bat","radius":-1.5}]}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "format_bad_radius");

        let mut f = parse(r#"{"id":"f","schematic":"s","rooms":[{"id":"a","mobs":[{"kind":"bat"}]}]}"#);
        f.rooms[0].mobs[0].radius = f64::INFINITY;
        assert_eq!(
            validate(&f, &AnyKind),
            Err(FormatError::BadRadius {
                format: "f".into(),
                room: "a".into(),
                kind: "bat".into()
            })
        );
    }

    #[test]
    fn test_huge_counts_are_rejected_not_overflowed() {
        let err = check(
            r#"{"id":"f","schematic":"s","rooms":[{"id":"a","key_drop":"marked_mob_kill","mobs":[
                {"kind":"zombie","count":4294967295,"marked":true},
                {"kind":"zombie","count":4294967295,"marked":true}]}],
                "doors":[{"id":"gate","room":"a","required_keys":2}]}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            FormatError::TooManyMobs {
                format: "f".into(),
                room: "a".into(),
                count: u32::MAX,
                limit: RoomTemplate::MOB_LIMIT
            }
        );

        let at_limit = format!(
            r#"{{"id":"f","schematic":"s","rooms":[{{"id":"a","mobs":[{{"kind":"rat","count":{}}}]}}]}}"#,
            RoomTemplate::MOB_LIMIT
        );
        assert_eq!(check(&at_limit), Ok(()));
    }
}
