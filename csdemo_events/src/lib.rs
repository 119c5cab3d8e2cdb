//! Typed domain events decoded from a demo, plus the sink interface the
//! parser pushes them through.
//!
//! Every game-event kind gets its own payload struct and enum variant; the
//! raw wire name survives only as [`DemoEvent::kind_name`] for display and
//! export.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Unassigned,
    Spectators,
    Terrorists,
    CounterTerrorists,
}

impl From<i32> for Team {
    fn from(id: i32) -> Self {
        match id {
            1 => Team::Spectators,
            2 => Team::Terrorists,
            3 => Team::CounterTerrorists,
            _ => Team::Unassigned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Snapshot of a player's identity at the moment an event fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub user_id: i32,
    pub name: String,
    pub steam_id: String,
    pub team: Team,
    pub position: Vector,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoundStarted {
    pub time_limit: i32,
    pub frag_limit: i32,
    pub objective: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEnded {
    pub winner: Team,
    pub reason: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoundOfficiallyEnded {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SideSwitch {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinalRoundAnnounced {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LastRoundOfHalfAnnounced {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMvp {
    pub player: PlayerRef,
    pub reason: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotTakeover {
    pub taker: PlayerRef,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchStarted {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FreezetimeEnded {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponFired {
    pub shooter: PlayerRef,
    pub weapon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDeath {
    pub victim: PlayerRef,
    pub killer: Option<PlayerRef>,
    pub assister: Option<PlayerRef>,
    pub weapon: String,
    pub headshot: bool,
    pub penetrated_objects: i32,
    pub is_suicide: bool,
    pub is_teamkill: bool,
    /// Killer/victim were humans controlling a bot when the kill landed.
    pub killer_controlling_bot: bool,
    pub victim_controlling_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerHurt {
    pub victim: PlayerRef,
    pub attacker: Option<PlayerRef>,
    pub health: i32,
    pub armor: i32,
    pub health_damage: i32,
    pub armor_damage: i32,
    pub hit_group: i32,
    pub weapon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFlashed {
    pub victim: PlayerRef,
    pub attacker: Option<PlayerRef>,
    pub blind_duration: f32,
}

/// Shared payload for grenade lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrenadeEvent {
    pub thrower: Option<PlayerRef>,
    pub position: Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConnected {
    pub player: PlayerRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDisconnected {
    pub player: PlayerRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTeamChanged {
    pub player: PlayerRef,
    pub new_team: Team,
    pub old_team: Team,
    pub due_to_disconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombPlantBegun {
    pub player: PlayerRef,
    pub site: char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombPlantAborted {
    pub player: PlayerRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombPlanted {
    pub player: PlayerRef,
    pub site: char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombDefused {
    pub player: PlayerRef,
    pub site: char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombExploded {
    pub player: Option<PlayerRef>,
    pub site: char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombDefuseBegun {
    pub player: PlayerRef,
    pub has_kit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombDefuseAborted {
    pub player: PlayerRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostageRescued {
    pub player: PlayerRef,
    pub hostage: char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostagePickedUp {
    pub player: PlayerRef,
    pub hostage: char,
}

/// Synthesized when the live chicken count drops below the count expected
/// for the round; there is no explicit wire event for these.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChickenDeath {}

macro_rules! demo_events {
    ($($variant:ident($payload:ty) => $name:literal,)+) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "data")]
        pub enum DemoEvent {
            $($variant($payload),)+
        }

        impl DemoEvent {
            /// The wire-format event name this variant was decoded from.
            pub fn kind_name(&self) -> &'static str {
                match self {
                    $(DemoEvent::$variant(_) => $name,)+
                }
            }
        }

    };
}

/// From impls only for payload types that appear in exactly one variant;
/// the grenade lifecycle variants share [`GrenadeEvent`] and are
/// constructed explicitly.
macro_rules! event_from {
    ($($variant:ident($payload:ty),)+) => {
        $(impl From<$payload> for DemoEvent {
            fn from(payload: $payload) -> Self {
                DemoEvent::$variant(payload)
            }
        })+
    };
}

demo_events! {
    RoundStarted(RoundStarted) => "round_start",
    RoundEnded(RoundEnded) => "round_end",
    RoundOfficiallyEnded(RoundOfficiallyEnded) => "round_officially_ended",
    SideSwitch(SideSwitch) => "announce_phase_end",
    FinalRoundAnnounced(FinalRoundAnnounced) => "round_announce_final",
    LastRoundOfHalfAnnounced(LastRoundOfHalfAnnounced) => "round_announce_last_round_half",
    RoundMvp(RoundMvp) => "round_mvp",
    BotTakeover(BotTakeover) => "bot_takeover",
    MatchStarted(MatchStarted) => "begin_new_match",
    FreezetimeEnded(FreezetimeEnded) => "round_freeze_end",
    WeaponFired(WeaponFired) => "weapon_fire",
    PlayerDeath(PlayerDeath) => "player_death",
    PlayerHurt(PlayerHurt) => "player_hurt",
    PlayerFlashed(PlayerFlashed) => "player_blind",
    FlashExploded(GrenadeEvent) => "flashbang_detonate",
    HeExploded(GrenadeEvent) => "hegrenade_detonate",
    DecoyStarted(GrenadeEvent) => "decoy_started",
    DecoyExploded(GrenadeEvent) => "decoy_detonate",
    SmokeStarted(GrenadeEvent) => "smokegrenade_detonate",
    SmokeExpired(GrenadeEvent) => "smokegrenade_expired",
    FireStarted(GrenadeEvent) => "inferno_startburn",
    FireExpired(GrenadeEvent) => "inferno_expire",
    PlayerConnected(PlayerConnected) => "player_connect",
    PlayerDisconnected(PlayerDisconnected) => "player_disconnect",
    PlayerTeamChanged(PlayerTeamChanged) => "player_team",
    BombPlantBegun(BombPlantBegun) => "bomb_beginplant",
    BombPlantAborted(BombPlantAborted) => "bomb_abortplant",
    BombPlanted(BombPlanted) => "bomb_planted",
    BombDefused(BombDefused) => "bomb_defused",
    BombExploded(BombExploded) => "bomb_exploded",
    BombDefuseBegun(BombDefuseBegun) => "bomb_begindefuse",
    BombDefuseAborted(BombDefuseAborted) => "bomb_abortdefuse",
    HostageRescued(HostageRescued) => "hostage_rescued",
    HostagePickedUp(HostagePickedUp) => "hostage_follows",
    ChickenDeath(ChickenDeath) => "chicken_death",
}

event_from! {
    RoundStarted(RoundStarted),
    RoundEnded(RoundEnded),
    RoundOfficiallyEnded(RoundOfficiallyEnded),
    SideSwitch(SideSwitch),
    FinalRoundAnnounced(FinalRoundAnnounced),
    LastRoundOfHalfAnnounced(LastRoundOfHalfAnnounced),
    RoundMvp(RoundMvp),
    BotTakeover(BotTakeover),
    MatchStarted(MatchStarted),
    FreezetimeEnded(FreezetimeEnded),
    WeaponFired(WeaponFired),
    PlayerDeath(PlayerDeath),
    PlayerHurt(PlayerHurt),
    PlayerFlashed(PlayerFlashed),
    PlayerConnected(PlayerConnected),
    PlayerDisconnected(PlayerDisconnected),
    PlayerTeamChanged(PlayerTeamChanged),
    BombPlantBegun(BombPlantBegun),
    BombPlantAborted(BombPlantAborted),
    BombPlanted(BombPlanted),
    BombDefused(BombDefused),
    BombExploded(BombExploded),
    BombDefuseBegun(BombDefuseBegun),
    BombDefuseAborted(BombDefuseAborted),
    HostageRescued(HostageRescued),
    HostagePickedUp(HostagePickedUp),
    ChickenDeath(ChickenDeath),
}

/// A decoded event plus its ambient timing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub tick: i32,
    pub round: u32,
    /// Seconds since the current round's freeze time ended, 0.0 before the
    /// first freeze end of the file.
    pub round_time: f32,
    pub event: DemoEvent,
}

/// Consumer of the decoded event stream. Events arrive in decode order,
/// which matches the per-tick order of the underlying demo.
pub trait EventSink {
    fn on_event(&mut self, event: EmittedEvent);
}

impl<F> EventSink for F
where
    F: FnMut(EmittedEvent),
{
    fn on_event(&mut self, event: EmittedEvent) {
        self(event)
    }
}

/// Sink that retains every event, for post-parse queries and tests.
#[derive(Debug, Default)]
pub struct EventCollector {
    pub events: Vec<EmittedEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_kind(&self, name: &str) -> impl Iterator<Item = &EmittedEvent> {
        let name = name.to_owned();
        self.events
            .iter()
            .filter(move |e| e.event.kind_name() == name)
    }
}

impl EventSink for EventCollector {
    fn on_event(&mut self, event: EmittedEvent) {
        self.events.push(event);
    }
}
