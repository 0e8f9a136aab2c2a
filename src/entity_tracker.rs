use crate::{
    entity_id::{RuntimeEntityId, UniqueEntityId},
    protocol::{
        packet::{id, PlayerList, RemoveEntity, SetEntityLink},
        Packet,
    },
};
use ahash::{AHashMap, AHashSet};

/// Entities the client currently knows about.
///
/// Entities are backend-local: when the session moves to another
/// backend, everything recorded here has to be removed from the
/// client, which is what [`EntityTracker::teardown`] produces.
#[derive(Debug, Default)]
pub struct EntityTracker {
    entities: AHashMap<UniqueEntityId, RuntimeEntityId>,
    /// Player list uuid to the unique id of the spawned player.
    players: AHashMap<u128, UniqueEntityId>,
    links: AHashSet<(UniqueEntityId, UniqueEntityId)>,
}

impl EntityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tracker needs to see packets with this id.
    pub fn interested(packet_id: u32) -> bool {
        matches!(
            packet_id,
            id::ADD_PLAYER
                | id::ADD_ENTITY
                | id::ADD_ITEM_ENTITY
                | id::REMOVE_ENTITY
                | id::PLAYER_LIST
                | id::SET_ENTITY_LINK
        )
    }

    /// Records the effect of a clientbound packet.
    pub fn observe(&mut self, packet: &Packet) {
        match packet {
            Packet::AddPlayer(packet) => {
                let unique_id = UniqueEntityId::new(packet.unique_entity_id);
                self.entities
                    .insert(unique_id, RuntimeEntityId::new(packet.runtime_entity_id));
                self.players.insert(packet.uuid, unique_id);
            }
            Packet::AddEntity(packet) => {
                self.entities.insert(
                    UniqueEntityId::new(packet.unique_entity_id),
                    RuntimeEntityId::new(packet.runtime_entity_id),
                );
            }
            Packet::AddItemEntity(packet) => {
                self.entities.insert(
                    UniqueEntityId::new(packet.unique_entity_id),
                    RuntimeEntityId::new(packet.runtime_entity_id),
                );
            }
            Packet::RemoveEntity(packet) => {
                let unique_id = UniqueEntityId::new(packet.unique_entity_id);
                self.entities.remove(&unique_id);
                self.links
                    .retain(|(from, to)| *from != unique_id && *to != unique_id);
            }
            Packet::PlayerList(PlayerList::Remove { uuids }) => {
                for uuid in uuids {
                    self.players.remove(uuid);
                }
            }
            Packet::SetEntityLink(link) => {
                let pair = (
                    UniqueEntityId::new(link.from_unique_entity_id),
                    UniqueEntityId::new(link.to_unique_entity_id),
                );
                if link.link_type == SetEntityLink::TYPE_REMOVE {
                    self.links.remove(&pair);
                } else {
                    self.links.insert(pair);
                }
            }
            _ => {}
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn contains(&self, unique_id: UniqueEntityId) -> bool {
        self.entities.contains_key(&unique_id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Packets removing everything tracked from the client. The
    /// tracker is empty afterwards.
    pub fn teardown(&mut self) -> Vec<Packet> {
        let mut packets: Vec<Packet> =
            Vec::with_capacity(self.links.len() + self.entities.len() + 1);
        for (from, to) in self.links.drain() {
            packets.push(SetEntityLink::remove(from.as_i64(), to.as_i64()).into());
        }
        for (unique_id, _) in self.entities.drain() {
            packets.push(
                RemoveEntity {
                    unique_entity_id: unique_id.as_i64(),
                }
                .into(),
            );
        }
        if !self.players.is_empty() {
            packets.push(
                PlayerList::Remove {
                    uuids: self.players.drain().map(|(uuid, _)| uuid).collect(),
                }
                .into(),
            );
        }
        packets
    }

    /// Forgets everything without producing packets.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.players.clear();
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        position::Vec3,
        protocol::{
            packet::{AddEntity, AddPlayer},
            types::{EntityMetadata, EntityProperties, ItemStack},
        },
    };

    fn add_entity(unique_entity_id: i64, runtime_entity_id: u64) -> Packet {
        AddEntity {
            unique_entity_id,
            runtime_entity_id,
            entity_type: "minecraft:pig".to_owned(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            pitch: 0.0,
            yaw: 0.0,
            head_yaw: 0.0,
            body_yaw: 0.0,
            attributes: Vec::new(),
            metadata: EntityMetadata::default(),
            rest: Vec::new(),
        }
        .into()
    }

    fn add_player(uuid: u128, unique_entity_id: i64) -> Packet {
        AddPlayer {
            uuid,
            username: "Steve".to_owned(),
            runtime_entity_id: unique_entity_id as u64,
            platform_chat_id: String::new(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            pitch: 0.0,
            yaw: 0.0,
            head_yaw: 0.0,
            held_item: ItemStack::default(),
            gamemode: 0,
            metadata: EntityMetadata::default(),
            properties: EntityProperties::default(),
            unique_entity_id,
            rest: Vec::new(),
        }
        .into()
    }

    fn link(from: i64, to: i64, link_type: u8) -> Packet {
        SetEntityLink {
            link_type,
            ..SetEntityLink::remove(from, to)
        }
        .into()
    }

    #[test]
    fn removal_forgets_entity_and_links() {
        let mut tracker = EntityTracker::new();
        tracker.observe(&add_entity(5, 50));
        tracker.observe(&add_entity(6, 60));
        tracker.observe(&link(5, 6, SetEntityLink::TYPE_RIDER));
        assert_eq!(tracker.link_count(), 1);

        tracker.observe(&RemoveEntity { unique_entity_id: 6 }.into());
        assert!(!tracker.contains(UniqueEntityId::new(6)));
        assert_eq!(tracker.link_count(), 0);
        assert_eq!(tracker.entity_count(), 1);
    }

    #[test]
    fn remove_links_are_honored() {
        let mut tracker = EntityTracker::new();
        tracker.observe(&link(1, 2, SetEntityLink::TYPE_PASSENGER));
        tracker.observe(&link(1, 2, SetEntityLink::TYPE_REMOVE));
        assert_eq!(tracker.link_count(), 0);
    }

    #[test]
    fn teardown_removes_everything() {
        let mut tracker = EntityTracker::new();
        tracker.observe(&add_entity(5, 50));
        tracker.observe(&add_player(0xabc, 9));
        tracker.observe(&link(9, 5, SetEntityLink::TYPE_RIDER));

        let packets = tracker.teardown();
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0], Packet::from(SetEntityLink::remove(9, 5)));
        assert!(packets[1..3]
            .iter()
            .all(|packet| matches!(packet, Packet::RemoveEntity(_))));
        assert_eq!(
            packets[3],
            Packet::from(PlayerList::Remove {
                uuids: vec![0xabc]
            })
        );

        assert_eq!(tracker.entity_count(), 0);
        assert!(tracker.teardown().is_empty());
    }

    #[test]
    fn player_list_removal_is_tracked() {
        let mut tracker = EntityTracker::new();
        tracker.observe(&add_player(7, 70));
        tracker.observe(&PlayerList::Remove { uuids: vec![7] }.into());
        tracker.observe(&RemoveEntity { unique_entity_id: 70 }.into());
        assert!(tracker.teardown().is_empty());
    }
}
