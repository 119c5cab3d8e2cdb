//! Turns resolved game events into typed domain events, carrying the
//! cross-event state the raw protocol leaves implicit: round counter,
//! freeze-time boundary, bot takeovers, bombsite/hostage identity, and the
//! chicken population heuristic.

use ahash::{AHashMap, AHashSet};
use csdemo_events::{
    BombDefuseAborted, BombDefuseBegun, BombDefused, BombExploded, BombPlantAborted, BombPlanted,
    BombPlantBegun, BotTakeover, ChickenDeath, DemoEvent, EmittedEvent, EventSink,
    FinalRoundAnnounced, FreezetimeEnded, GrenadeEvent, HostagePickedUp, HostageRescued,
    LastRoundOfHalfAnnounced, MatchStarted, PlayerConnected, PlayerDeath, PlayerDisconnected,
    PlayerFlashed, PlayerHurt, PlayerRef, PlayerTeamChanged, RoundEnded, RoundMvp,
    RoundOfficiallyEnded, RoundStarted, SideSwitch, Team, Vector, WeaponFired,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gameevent::{EventRegistry, RawGameEvent};
use crate::netmessages::CsvcMsgGameEvent;
use crate::SessionState;

#[derive(Debug, Default)]
pub struct GameEventDispatcher {
    registry: Option<EventRegistry>,
    round: u32,
    freeze_end_tick: Option<i32>,
    /// Userids of humans who took over a bot this round. Cleared only on
    /// round_officially_ended.
    bot_controllers: AHashSet<i32>,
    site_labels: AHashMap<i32, char>,
    hostage_labels: AHashMap<i32, char>,
    expected_chickens: usize,
}

macro_rules! raw_event {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct $name {
            $($field: $ty,)*
        }
    };
}

raw_event!(RawRoundStart { timelimit: i32, fraglimit: i32, objective: String });
raw_event!(RawRoundEnd { winner: i32, reason: i32, message: String });
raw_event!(RawRoundMvp { userid: i32, reason: i32 });
raw_event!(RawBotTakeover { userid: i32 });
raw_event!(RawWeaponFire { userid: i32, weapon: String });
raw_event!(RawPlayerDeath {
    userid: i32,
    attacker: i32,
    assister: i32,
    weapon: String,
    headshot: bool,
    penetrated: i32,
});
raw_event!(RawPlayerHurt {
    userid: i32,
    attacker: i32,
    health: i32,
    armor: i32,
    dmg_health: i32,
    dmg_armor: i32,
    hitgroup: i32,
    weapon: String,
});
raw_event!(RawPlayerBlind { userid: i32, attacker: i32, blind_duration: f32 });
raw_event!(RawGrenade { userid: i32, x: f32, y: f32, z: f32 });
raw_event!(RawPlayerConnect { userid: i32, name: String, networkid: String });
raw_event!(RawPlayerDisconnect { userid: i32, reason: String });
raw_event!(RawPlayerTeam { userid: i32, team: i32, oldteam: i32, disconnect: bool });
raw_event!(RawBombSite { userid: i32, site: i32 });
raw_event!(RawBombPlayer { userid: i32 });
raw_event!(RawBombDefuse { userid: i32, haskit: bool });
raw_event!(RawHostage { userid: i32, hostage: i32 });

impl GameEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_registry(&mut self, registry: EventRegistry) {
        self.registry = Some(registry);
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn apply(
        &mut self,
        msg: &CsvcMsgGameEvent,
        state: &SessionState,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let raw = self
            .registry
            .as_ref()
            .ok_or(Error::UnknownEventDescriptor { id: msg.eventid() })?
            .resolve(msg)?;
        self.dispatch(&raw, state, sink)
    }

    fn dispatch(
        &mut self,
        raw: &RawGameEvent,
        state: &SessionState,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        match raw.name.as_str() {
            "round_start" => {
                let ev: RawRoundStart = raw.deserialize()?;
                self.round += 1;
                self.expected_chickens = state.chicken_count();
                self.emit(
                    state,
                    sink,
                    RoundStarted {
                        time_limit: ev.timelimit,
                        frag_limit: ev.fraglimit,
                        objective: ev.objective,
                    }
                    .into(),
                );
            }
            "round_end" => {
                let ev: RawRoundEnd = raw.deserialize()?;
                self.emit(
                    state,
                    sink,
                    RoundEnded {
                        winner: Team::from(ev.winner),
                        reason: ev.reason,
                        message: ev.message,
                    }
                    .into(),
                );
            }
            "round_officially_ended" => {
                self.bot_controllers.clear();
                self.emit(state, sink, RoundOfficiallyEnded {}.into());
            }
            "announce_phase_end" => self.emit(state, sink, SideSwitch {}.into()),
            "round_announce_final" => self.emit(state, sink, FinalRoundAnnounced {}.into()),
            "round_announce_last_round_half" => {
                self.emit(state, sink, LastRoundOfHalfAnnounced {}.into())
            }
            "round_mvp" => {
                let ev: RawRoundMvp = raw.deserialize()?;
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(
                    state,
                    sink,
                    RoundMvp {
                        player,
                        reason: ev.reason,
                    }
                    .into(),
                );
            }
            "bot_takeover" => {
                let ev: RawBotTakeover = raw.deserialize()?;
                self.bot_controllers.insert(ev.userid);
                let taker = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BotTakeover { taker }.into());
            }
            "begin_new_match" => self.emit(state, sink, MatchStarted {}.into()),
            "round_freeze_end" => {
                self.freeze_end_tick = Some(state.tick);
                self.emit(state, sink, FreezetimeEnded {}.into());
            }
            "weapon_fire" => {
                let ev: RawWeaponFire = raw.deserialize()?;
                let shooter = state.player_ref_or_unknown(ev.userid);
                self.emit(
                    state,
                    sink,
                    WeaponFired {
                        shooter,
                        weapon: ev.weapon,
                    }
                    .into(),
                );
            }
            "player_death" => {
                let ev: RawPlayerDeath = raw.deserialize()?;
                let victim = state.player_ref_or_unknown(ev.userid);
                let killer = state.player_ref(ev.attacker);
                let assister = state.player_ref(ev.assister);
                let is_suicide = ev.attacker == ev.userid || ev.attacker == 0;
                let is_teamkill = !is_suicide
                    && killer
                        .as_ref()
                        .map_or(false, |k| k.team != Team::Unassigned && k.team == victim.team);
                self.emit(
                    state,
                    sink,
                    PlayerDeath {
                        killer_controlling_bot: self.bot_controllers.contains(&ev.attacker),
                        victim_controlling_bot: self.bot_controllers.contains(&ev.userid),
                        victim,
                        killer,
                        assister,
                        weapon: ev.weapon,
                        headshot: ev.headshot,
                        penetrated_objects: ev.penetrated,
                        is_suicide,
                        is_teamkill,
                    }
                    .into(),
                );
            }
            "player_hurt" => {
                let ev: RawPlayerHurt = raw.deserialize()?;
                self.emit(
                    state,
                    sink,
                    PlayerHurt {
                        victim: state.player_ref_or_unknown(ev.userid),
                        attacker: state.player_ref(ev.attacker),
                        health: ev.health,
                        armor: ev.armor,
                        health_damage: ev.dmg_health,
                        armor_damage: ev.dmg_armor,
                        hit_group: ev.hitgroup,
                        weapon: ev.weapon,
                    }
                    .into(),
                );
            }
            "player_blind" => {
                let ev: RawPlayerBlind = raw.deserialize()?;
                self.emit(
                    state,
                    sink,
                    PlayerFlashed {
                        victim: state.player_ref_or_unknown(ev.userid),
                        attacker: state.player_ref(ev.attacker),
                        blind_duration: ev.blind_duration,
                    }
                    .into(),
                );
            }
            "flashbang_detonate" | "hegrenade_detonate" | "decoy_started" | "decoy_detonate"
            | "smokegrenade_detonate" | "smokegrenade_expired" | "inferno_startburn"
            | "inferno_expire" => {
                let ev: RawGrenade = raw.deserialize()?;
                let payload = GrenadeEvent {
                    thrower: state.player_ref(ev.userid),
                    position: Vector {
                        x: ev.x,
                        y: ev.y,
                        z: ev.z,
                    },
                };
                let event = match raw.name.as_str() {
                    "flashbang_detonate" => DemoEvent::FlashExploded(payload),
                    "hegrenade_detonate" => DemoEvent::HeExploded(payload),
                    "decoy_started" => DemoEvent::DecoyStarted(payload),
                    "decoy_detonate" => DemoEvent::DecoyExploded(payload),
                    "smokegrenade_detonate" => DemoEvent::SmokeStarted(payload),
                    "smokegrenade_expired" => DemoEvent::SmokeExpired(payload),
                    "inferno_startburn" => DemoEvent::FireStarted(payload),
                    _ => DemoEvent::FireExpired(payload),
                };
                self.emit(state, sink, event);
            }
            "player_connect" => {
                let ev: RawPlayerConnect = raw.deserialize()?;
                // The roster entry usually lags the event; build the ref
                // from the event payload itself.
                let player = PlayerRef {
                    user_id: ev.userid,
                    name: ev.name,
                    steam_id: ev.networkid,
                    team: Team::Unassigned,
                    position: Vector::default(),
                    is_bot: false,
                };
                self.emit(state, sink, PlayerConnected { player }.into());
            }
            "player_disconnect" => {
                let ev: RawPlayerDisconnect = raw.deserialize()?;
                self.emit(
                    state,
                    sink,
                    PlayerDisconnected {
                        player: state.player_ref_or_unknown(ev.userid),
                        reason: ev.reason,
                    }
                    .into(),
                );
            }
            "player_team" => {
                let ev: RawPlayerTeam = raw.deserialize()?;
                self.emit(
                    state,
                    sink,
                    PlayerTeamChanged {
                        player: state.player_ref_or_unknown(ev.userid),
                        new_team: Team::from(ev.team),
                        old_team: Team::from(ev.oldteam),
                        due_to_disconnect: ev.disconnect,
                    }
                    .into(),
                );
            }
            "bomb_beginplant" => {
                let ev: RawBombSite = raw.deserialize()?;
                let site = next_label(&mut self.site_labels, ev.site);
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BombPlantBegun { player, site }.into());
            }
            "bomb_abortplant" => {
                let ev: RawBombPlayer = raw.deserialize()?;
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BombPlantAborted { player }.into());
            }
            "bomb_planted" => {
                let ev: RawBombSite = raw.deserialize()?;
                let site = next_label(&mut self.site_labels, ev.site);
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BombPlanted { player, site }.into());
            }
            "bomb_defused" => {
                let ev: RawBombSite = raw.deserialize()?;
                let site = next_label(&mut self.site_labels, ev.site);
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BombDefused { player, site }.into());
            }
            "bomb_exploded" => {
                let ev: RawBombSite = raw.deserialize()?;
                let site = next_label(&mut self.site_labels, ev.site);
                self.emit(
                    state,
                    sink,
                    BombExploded {
                        player: state.player_ref(ev.userid),
                        site,
                    }
                    .into(),
                );
            }
            "bomb_begindefuse" => {
                let ev: RawBombDefuse = raw.deserialize()?;
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(
                    state,
                    sink,
                    BombDefuseBegun {
                        player,
                        has_kit: ev.haskit,
                    }
                    .into(),
                );
            }
            "bomb_abortdefuse" => {
                let ev: RawBombPlayer = raw.deserialize()?;
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, BombDefuseAborted { player }.into());
            }
            "hostage_rescued" => {
                let ev: RawHostage = raw.deserialize()?;
                let hostage = next_label(&mut self.hostage_labels, ev.hostage);
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, HostageRescued { player, hostage }.into());
            }
            "hostage_follows" => {
                let ev: RawHostage = raw.deserialize()?;
                let hostage = next_label(&mut self.hostage_labels, ev.hostage);
                let player = state.player_ref_or_unknown(ev.userid);
                self.emit(state, sink, HostagePickedUp { player, hostage }.into());
            }
            other => {
                log::trace!("unhandled game event {:?}", other);
            }
        }
        Ok(())
    }

    /// Synthesizes one chicken death per missing live instance. Called after
    /// every applied command batch; best-effort inference, not a wire
    /// signal.
    pub fn reconcile_chickens(&mut self, state: &SessionState, sink: &mut dyn EventSink) {
        let live = state.chicken_count();
        if live > self.expected_chickens {
            self.expected_chickens = live;
            return;
        }
        while self.expected_chickens > live {
            self.expected_chickens -= 1;
            log::debug!("chicken count dropped to {live}, synthesizing death");
            self.emit(state, sink, ChickenDeath {}.into());
        }
    }

    fn emit(&self, state: &SessionState, sink: &mut dyn EventSink, event: DemoEvent) {
        sink.on_event(EmittedEvent {
            tick: state.tick,
            round: self.round,
            round_time: self.round_time(state),
            event,
        });
    }

    fn round_time(&self, state: &SessionState) -> f32 {
        match self.freeze_end_tick {
            Some(start) => (state.tick - start).max(0) as f32 / state.tick_rate(),
            None => 0.0,
        }
    }
}

/// First-seen index becomes 'A', the second 'B'; anything after that is the
/// anomalous-input fallback '?'.
fn next_label(cache: &mut AHashMap<i32, char>, index: i32) -> char {
    if let Some(&label) = cache.get(&index) {
        return label;
    }
    let label = match cache.len() {
        0 => 'A',
        1 => 'B',
        _ => '?',
    };
    cache.insert(index, label);
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmessages::{
        CsvcMsgGameEventList, GameEventDescriptor, GameEventDescriptorKey, GameEventKey,
    };
    use crate::player::PlayerInfo;
    use csdemo_events::EventCollector;

    fn registry() -> EventRegistry {
        let descriptors = vec![
            (40, "round_start", vec![("timelimit", 3), ("fraglimit", 3), ("objective", 1)]),
            (41, "round_freeze_end", vec![]),
            (42, "bomb_planted", vec![("userid", 4), ("site", 4)]),
            (43, "bomb_exploded", vec![("userid", 4), ("site", 4)]),
            (44, "hostage_follows", vec![("userid", 4), ("hostage", 4)]),
            (45, "round_officially_ended", vec![]),
            (46, "bot_takeover", vec![("userid", 4)]),
            (47, "player_death", vec![
                ("userid", 4),
                ("attacker", 4),
                ("assister", 4),
                ("weapon", 1),
                ("headshot", 6),
                ("penetrated", 4),
            ]),
        ];
        EventRegistry::from_proto(&CsvcMsgGameEventList {
            descriptors: descriptors
                .into_iter()
                .map(|(id, name, keys): (i32, &str, Vec<(&str, i32)>)| GameEventDescriptor {
                    eventid: Some(id),
                    name: Some(name.to_owned()),
                    keys: keys
                        .into_iter()
                        .map(|(k, t)| GameEventDescriptorKey {
                            r#type: Some(t),
                            name: Some(k.to_owned()),
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    fn short(v: i32) -> GameEventKey {
        GameEventKey {
            r#type: Some(4),
            val_short: Some(v),
            ..Default::default()
        }
    }

    fn string(v: &str) -> GameEventKey {
        GameEventKey {
            r#type: Some(1),
            val_string: Some(v.to_owned()),
            ..Default::default()
        }
    }

    fn boolean(v: bool) -> GameEventKey {
        GameEventKey {
            r#type: Some(6),
            val_bool: Some(v),
            ..Default::default()
        }
    }

    fn long(v: i32) -> GameEventKey {
        GameEventKey {
            r#type: Some(3),
            val_long: Some(v),
            ..Default::default()
        }
    }

    fn occurrence(id: i32, keys: Vec<GameEventKey>) -> CsvcMsgGameEvent {
        CsvcMsgGameEvent {
            event_name: None,
            eventid: Some(id),
            keys,
        }
    }

    fn state_with_players(players: &[(i32, &str)]) -> SessionState {
        let mut state = SessionState::new();
        for (user_id, name) in players {
            state.players.insert(
                *user_id,
                PlayerInfo {
                    user_id: *user_id,
                    name: (*name).to_owned(),
                    ..Default::default()
                },
            );
        }
        state
    }

    fn dispatcher() -> GameEventDispatcher {
        let mut d = GameEventDispatcher::new();
        d.set_registry(registry());
        d
    }

    #[test]
    fn round_and_bomb_sequence_with_site_labels_and_round_time() {
        let mut d = dispatcher();
        let mut state = state_with_players(&[(7, "planter")]);
        let mut sink = EventCollector::new();

        state.tick = 1000;
        d.apply(
            &occurrence(40, vec![long(115), long(0), string("BOMB TARGET")]),
            &state,
            &mut sink,
        )
        .unwrap();
        state.tick = 2920; // 15s of freeze time at 128 ticks/s
        d.apply(&occurrence(41, vec![]), &state, &mut sink).unwrap();
        state.tick = 2920 + 128 * 30;
        d.apply(&occurrence(42, vec![short(7), short(7)]), &state, &mut sink)
            .unwrap();
        state.tick = 2920 + 128 * 70;
        d.apply(&occurrence(43, vec![short(0), short(7)]), &state, &mut sink)
            .unwrap();

        let events = &sink.events;
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0].event, DemoEvent::RoundStarted(_)));
        assert_eq!(events[0].round, 1);
        assert_eq!(events[0].round_time, 0.0);
        assert!(matches!(events[1].event, DemoEvent::FreezetimeEnded(_)));
        assert_eq!(events[1].round_time, 0.0);
        match &events[2].event {
            DemoEvent::BombPlanted(b) => {
                assert_eq!(b.site, 'A');
                assert_eq!(b.player.name, "planter");
            }
            other => panic!("expected BombPlanted, got {other:?}"),
        }
        assert_eq!(events[2].round_time, 30.0);
        match &events[3].event {
            DemoEvent::BombExploded(b) => assert_eq!(b.site, 'A'),
            other => panic!("expected BombExploded, got {other:?}"),
        }
        assert_eq!(events[3].round_time, 70.0);
    }

    #[test]
    fn hostage_indices_label_a_b_then_fallback() {
        let mut d = dispatcher();
        let state = state_with_players(&[(3, "rescuer")]);
        let mut sink = EventCollector::new();

        for hostage in [250, 251, 250, 252] {
            d.apply(
                &occurrence(44, vec![short(3), short(hostage)]),
                &state,
                &mut sink,
            )
            .unwrap();
        }

        let labels: Vec<char> = sink
            .events
            .iter()
            .map(|e| match &e.event {
                DemoEvent::HostagePickedUp(h) => h.hostage,
                other => panic!("expected HostagePickedUp, got {other:?}"),
            })
            .collect();
        assert_eq!(labels, vec!['A', 'B', 'A', '?']);
    }

    #[test]
    fn takeover_roster_survives_until_round_officially_ended() {
        let mut d = dispatcher();
        let state = state_with_players(&[(5, "human"), (9, "victim")]);
        let mut sink = EventCollector::new();

        d.apply(&occurrence(46, vec![short(5)]), &state, &mut sink)
            .unwrap();
        d.apply(
            &occurrence(
                47,
                vec![short(9), short(5), short(0), string("ak47"), boolean(true), short(0)],
            ),
            &state,
            &mut sink,
        )
        .unwrap();
        match &sink.events[1].event {
            DemoEvent::PlayerDeath(death) => {
                assert!(death.killer_controlling_bot);
                assert!(!death.victim_controlling_bot);
                assert!(death.headshot);
                assert!(!death.is_suicide);
            }
            other => panic!("expected PlayerDeath, got {other:?}"),
        }

        d.apply(&occurrence(45, vec![]), &state, &mut sink).unwrap();
        d.apply(
            &occurrence(
                47,
                vec![short(9), short(5), short(0), string("ak47"), boolean(false), short(0)],
            ),
            &state,
            &mut sink,
        )
        .unwrap();
        match &sink.events[3].event {
            DemoEvent::PlayerDeath(death) => assert!(!death.killer_controlling_bot),
            other => panic!("expected PlayerDeath, got {other:?}"),
        }
    }

    #[test]
    fn suicide_when_attacker_is_victim_or_world() {
        let mut d = dispatcher();
        let state = state_with_players(&[(9, "faller")]);
        let mut sink = EventCollector::new();
        d.apply(
            &occurrence(
                47,
                vec![short(9), short(0), short(0), string("world"), boolean(false), short(0)],
            ),
            &state,
            &mut sink,
        )
        .unwrap();
        match &sink.events[0].event {
            DemoEvent::PlayerDeath(death) => {
                assert!(death.is_suicide);
                assert!(death.killer.is_none());
            }
            other => panic!("expected PlayerDeath, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_id_propagates() {
        let mut d = dispatcher();
        let state = SessionState::new();
        let mut sink = EventCollector::new();
        assert!(matches!(
            d.apply(&occurrence(999, vec![]), &state, &mut sink),
            Err(Error::UnknownEventDescriptor { id: 999 })
        ));
    }
}
