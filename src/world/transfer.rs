//! Moving a character between fields.
//!
//! The steps run in a fixed order without a global lock: leave the source
//! registry, pick the arrival point, update the map id, bump the field key,
//! join the destination registry. The character can be briefly absent from
//! both fields but is never present in two.
//!
//! `on_placed` runs between placement and joining, so the client learns about
//! its new field before the room's spawn packets arrive.

use std::sync::Arc;

use tracing::{debug, info};

use crate::protocol::movement::Point;
use crate::world::character::Character;
use crate::world::field::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub portal_id: u8,
    pub position: Point,
    /// False when the named portal was missing and the default spawn was used.
    pub via_portal: bool,
    pub field_key: u8,
}

/// Place a character that is not yet in any field (migrate-in).
pub fn enter<F>(
    character: &Arc<Character>,
    to: &Field,
    portal_name: Option<&str>,
    on_placed: F,
) -> Arrival
where
    F: FnOnce(&Arrival),
{
    let arrival = place(character, to, portal_name);
    on_placed(&arrival);
    to.add_character(character);
    arrival
}

/// Move a character from `from` to `to`.
pub fn transfer<F>(
    character: &Arc<Character>,
    from: &Field,
    to: &Field,
    portal_name: Option<&str>,
    on_placed: F,
) -> Arrival
where
    F: FnOnce(&Arrival),
{
    from.remove_character(character.id());
    let arrival = place(character, to, portal_name);
    on_placed(&arrival);
    to.add_character(character);
    info!(
        character_id = character.id(),
        from = from.map_id(),
        to = to.map_id(),
        portal = arrival.portal_id,
        "Field transfer"
    );
    arrival
}

fn place(character: &Character, to: &Field, portal_name: Option<&str>) -> Arrival {
    let (portal_id, position, via_portal) = to.arrival_point(portal_name);
    if via_portal {
        debug!(character_id = character.id(), map_id = to.map_id(), portal = ?portal_name, "Arriving at named portal");
    } else {
        debug!(character_id = character.id(), map_id = to.map_id(), portal = ?portal_name, "Portal not found, using default spawn");
    }

    let mut state = character.state();
    state.record.map_id = to.map_id();
    state.record.spawn_point = portal_id;
    state.position = position;
    state.foothold = 0;
    state.field_key = state.field_key.wrapping_add(1);
    Arrival {
        portal_id,
        position,
        via_portal,
        field_key: state.field_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAP_ID;
    use crate::data::{MapProvider, StaticMaps};
    use crate::repository;
    use crate::transport::ConnectionHandle;
    use crate::world::field::FieldSettings;

    fn field(data: &StaticMaps, map_id: i32) -> Arc<Field> {
        let map = data.map(map_id).unwrap();
        Field::new(map, data, &FieldSettings::default(), Vec::new())
    }

    #[tokio::test]
    async fn transfer_moves_between_registries_and_bumps_key() {
        let data = StaticMaps::builtin();
        let town = field(&data, DEFAULT_MAP_ID);
        let hunting = field(&data, 100_010_000);
        let (conn, _rx) = ConnectionHandle::detached("127.0.0.1:1".parse().unwrap(), 256);
        let record = repository::Character::new(1, 1, 0, "Mover");
        let character = Character::new(record, Vec::new(), Point::default(), conn);

        let first = enter(&character, &town, None, |_| {});
        assert!(town.characters().contains(1));

        let mut seen = None;
        let second = transfer(&character, &town, &hunting, Some("west00"), |a| {
            seen = Some(a.field_key);
        });
        assert!(!town.characters().contains(1));
        assert!(hunting.characters().contains(1));
        assert!(second.via_portal);
        assert_eq!(seen, Some(second.field_key));
        assert_eq!(second.field_key, first.field_key.wrapping_add(1));
        assert_eq!(character.map_id(), 100_010_000);

        town.close();
        hunting.close();
    }

    #[tokio::test]
    async fn missing_portal_falls_back_to_default_spawn() {
        let data = StaticMaps::builtin();
        let town = field(&data, DEFAULT_MAP_ID);
        let (conn, _rx) = ConnectionHandle::detached("127.0.0.1:1".parse().unwrap(), 256);
        let character = Character::new(
            repository::Character::new(2, 1, 0, "Lost"),
            Vec::new(),
            Point::default(),
            conn,
        );
        let arrival = enter(&character, &town, Some("nowhere"), |_| {});
        assert!(!arrival.via_portal);
        assert_eq!(arrival.portal_id, town.data().default_spawn().0);
        town.close();
    }
}
