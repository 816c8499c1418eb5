use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints (one stay's check-out equal to the next check-in) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`. Equal bounds count as contained.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Guest,
    HotelStaff,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::HotelStaff => "hotel_staff",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guest" => Some(Role::Guest),
            "hotel_staff" => Some(Role::HotelStaff),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The caller of an engine operation, as established by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Ulid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.role, Role::HotelStaff | Role::Admin)
    }

    pub fn owns_or_elevated(&self, owner: Ulid) -> bool {
        self.user_id == owner || self.is_elevated()
    }
}

// ── Statuses ─────────────────────────────────────────────────────

/// Operational status of a room. Occupancy is never stored here; it is
/// derived from live bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Cleaning,
    Maintenance,
    OutOfOrder,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Cleaning => "cleaning",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::OutOfOrder => "out_of_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(RoomStatus::Available),
            "cleaning" => Some(RoomStatus::Cleaning),
            "maintenance" => Some(RoomStatus::Maintenance),
            "out_of_order" => Some(RoomStatus::OutOfOrder),
            _ => None,
        }
    }

    pub fn is_bookable(&self) -> bool {
        matches!(self, RoomStatus::Available)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            "checked_in" => Some(BookingStatus::CheckedIn),
            "checked_out" => Some(BookingStatus::CheckedOut),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Live bookings block the room; cancelled ones don't.
    pub fn is_live(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Some(Weekday::Mon),
            "tue" | "tuesday" => Some(Weekday::Tue),
            "wed" | "wednesday" => Some(Weekday::Wed),
            "thu" | "thursday" => Some(Weekday::Thu),
            "fri" | "friday" => Some(Weekday::Fri),
            "sat" | "saturday" => Some(Weekday::Sat),
            "sun" | "sunday" => Some(Weekday::Sun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MusicService {
    Spotify,
    YandexMusic,
    DefaultSound,
}

impl MusicService {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicService::Spotify => "spotify",
            MusicService::YandexMusic => "yandex_music",
            MusicService::DefaultSound => "default_sound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spotify" => Some(MusicService::Spotify),
            "yandex_music" => Some(MusicService::YandexMusic),
            "default_sound" => Some(MusicService::DefaultSound),
            _ => None,
        }
    }
}

// ── Opaque payloads ──────────────────────────────────────────────

/// Opaque structured payload (lighting scene, climate setpoints, BLE key info).
/// Stored as canonical JSON text: bincode cannot encode `serde_json::Value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob(String);

impl Blob {
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    /// Parse and re-serialize, rejecting anything that isn't JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.0).unwrap_or(serde_json::Value::Null)
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    /// `[check-in, check-out)`
    pub stay: Span,
    pub status: BookingStatus,
    /// Minor currency units.
    pub total_price: u64,
    pub special_requests: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestAccess {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub primary_guest_id: Ulid,
    pub shared_with_user_id: Option<Ulid>,
    /// E-mail or phone of a guest without an account.
    pub shared_with_contact: Option<String>,
    pub room_id: Ulid,
    pub window: Span,
    pub temporary_key: Option<Blob>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTime {
    pub hour: u8,
    pub minute: u8,
}

impl AlarmTime {
    pub fn is_valid(&self) -> bool {
        self.hour < 24 && self.minute < 60
    }
}

impl std::fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Music {
    pub service: MusicService,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub time: AlarmTime,
    /// Empty means a one-off alarm.
    pub days: Vec<Weekday>,
    pub active: bool,
    pub label: Option<String>,
    pub music: Option<Music>,
    pub scenario: Option<String>,
    /// Effective dates; nested in the owning booking's stay.
    pub window: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlChange {
    Lighting(Blob),
    Climate(Blob),
    Curtains(Blob),
    DoNotDisturb(bool),
}

impl ControlChange {
    pub fn field_name(&self) -> &'static str {
        match self {
            ControlChange::Lighting(_) => "lighting",
            ControlChange::Climate(_) => "climate",
            ControlChange::Curtains(_) => "curtains",
            ControlChange::DoNotDisturb(_) => "dnd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomControlState {
    pub room_id: Ulid,
    pub lighting: Option<Blob>,
    pub climate: Option<Blob>,
    pub curtains: Option<Blob>,
    pub dnd: bool,
    pub updated_at: Ms,
    pub changed_by: Ulid,
}

impl RoomControlState {
    pub fn empty(room_id: Ulid, at: Ms, by: Ulid) -> Self {
        Self {
            room_id,
            lighting: None,
            climate: None,
            curtains: None,
            dnd: false,
            updated_at: at,
            changed_by: by,
        }
    }

    /// Set exactly one field; everything else is left as it was.
    pub fn apply(&mut self, change: &ControlChange, at: Ms, by: Ulid) {
        match change {
            ControlChange::Lighting(b) => self.lighting = Some(b.clone()),
            ControlChange::Climate(b) => self.climate = Some(b.clone()),
            ControlChange::Curtains(b) => self.curtains = Some(b.clone()),
            ControlChange::DoNotDisturb(on) => self.dnd = *on,
        }
        self.updated_at = at;
        self.changed_by = by;
    }
}

/// Everything the engine tracks for one room. Guarded by the room's lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub number: String,
    pub status: RoomStatus,
    /// All bookings (live and cancelled), sorted by `stay.start`.
    pub bookings: Vec<Booking>,
    pub access: Vec<GuestAccess>,
    pub alarms: Vec<Alarm>,
    pub controls: Option<RoomControlState>,
    /// Set under the write lock when the room is removed, so tasks still
    /// holding the old handle see it gone.
    pub retired: bool,
}

impl RoomState {
    pub fn new(id: Ulid, number: String, status: RoomStatus) -> Self {
        Self {
            id,
            number,
            status,
            bookings: Vec::new(),
            access: Vec::new(),
            alarms: Vec::new(),
            controls: None,
            retired: false,
        }
    }

    /// Insert booking maintaining sort order by stay.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose stay overlaps the query window, live or not.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end > query.start)
    }

    pub fn has_live_bookings(&self) -> bool {
        self.bookings.iter().any(Booking::is_live)
    }

    pub fn access(&self, id: Ulid) -> Option<&GuestAccess> {
        self.access.iter().find(|a| a.id == id)
    }

    pub fn alarm(&self, id: Ulid) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.id == id)
    }

    /// Deactivate every grant hanging off a booking. Returns how many flipped.
    pub fn deactivate_dependents(&mut self, booking_id: Ulid) -> usize {
        let mut flipped = 0;
        for a in self.access.iter_mut().filter(|a| a.booking_id == booking_id && a.active) {
            a.active = false;
            flipped += 1;
        }
        for a in self.alarms.iter_mut().filter(|a| a.booking_id == booking_id && a.active) {
            a.active = false;
            flipped += 1;
        }
        flipped
    }

    /// Drop every grant hanging off a booking, returning their ids.
    pub fn remove_dependents(&mut self, booking_id: Ulid) -> Vec<Ulid> {
        let mut removed = Vec::new();
        self.access.retain(|a| {
            if a.booking_id == booking_id {
                removed.push(a.id);
                false
            } else {
                true
            }
        });
        self.alarms.retain(|a| {
            if a.booking_id == booking_id {
                removed.push(a.id);
                false
            } else {
                true
            }
        });
        removed
    }
}

/// Every state change, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        id: Ulid,
        number: String,
        status: RoomStatus,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    RoomRemoved {
        id: Ulid,
    },
    BookingCreated(Booking),
    BookingTransitioned {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    /// Administrative patch; `by` is the acting staff member.
    BookingRevised {
        booking: Booking,
        by: Ulid,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
        by: Ulid,
    },
    AccessGranted(GuestAccess),
    AccessRevised(GuestAccess),
    AccessRevoked {
        id: Ulid,
        room_id: Ulid,
    },
    AlarmSet(Alarm),
    AlarmRevised(Alarm),
    AlarmRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    ControlsChanged {
        room_id: Ulid,
        change: ControlChange,
        by: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub number: String,
    pub status: RoomStatus,
    /// Live booking covering the moment of the query, if any.
    pub occupied_by: Option<Ulid>,
}
