use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_window;
use super::EngineError;

// Every create/patch arrives as one of these. `validate()` runs before any
// lock is taken or any guard is consulted, so a malformed request never
// touches room state.

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidField { field, reason: "must not be empty" });
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

fn check_blob(field: &'static str, blob: &Blob) -> Result<(), EngineError> {
    if blob.len() > MAX_BLOB_LEN {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub total_price: u64,
    pub special_requests: Option<String>,
}

impl NewBooking {
    /// Returns the stay window.
    pub fn validate(&self) -> Result<Span, EngineError> {
        if let Some(note) = &self.special_requests
            && note.len() > MAX_SPECIAL_REQUESTS_LEN
        {
            return Err(EngineError::LimitExceeded("special_requests"));
        }
        validate_window("stay", self.check_in, self.check_out, MAX_STAY_MS)
    }
}

/// Administrative patch of a booking. `None` leaves a field untouched;
/// `special_requests: Some(None)` clears the note.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
    pub status: Option<BookingStatus>,
    pub total_price: Option<u64>,
    pub special_requests: Option<Option<String>>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.check_in.is_none()
            && self.check_out.is_none()
            && self.status.is_none()
            && self.total_price.is_none()
            && self.special_requests.is_none()
    }

    /// Field-level checks that don't need the current booking.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.is_empty() {
            return Err(EngineError::InvalidField { field: "patch", reason: "nothing to change" });
        }
        if let Some(Some(note)) = &self.special_requests
            && note.len() > MAX_SPECIAL_REQUESTS_LEN
        {
            return Err(EngineError::LimitExceeded("special_requests"));
        }
        Ok(())
    }

    /// The booking as it would look after the patch. The merged stay is
    /// re-validated, so a patch can never produce check-in >= check-out.
    pub fn apply_to(&self, current: &Booking) -> Result<Booking, EngineError> {
        let check_in = self.check_in.unwrap_or(current.stay.start);
        let check_out = self.check_out.unwrap_or(current.stay.end);
        let stay = validate_window("stay", check_in, check_out, MAX_STAY_MS)?;
        let mut next = current.clone();
        next.stay = stay;
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(price) = self.total_price {
            next.total_price = price;
        }
        if let Some(note) = &self.special_requests {
            next.special_requests = note.clone();
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGuestAccess {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub access_start: Ms,
    pub access_end: Ms,
    pub shared_with_user_id: Option<Ulid>,
    pub shared_with_contact: Option<String>,
    pub temporary_key: Option<Blob>,
}

impl NewGuestAccess {
    /// Returns the access window. Nesting inside the stay is checked later,
    /// against the booking.
    pub fn validate(&self) -> Result<Span, EngineError> {
        if self.shared_with_user_id.is_none() && self.shared_with_contact.is_none() {
            return Err(EngineError::InvalidField {
                field: "shared_with",
                reason: "needs a user id or a contact",
            });
        }
        if let Some(contact) = &self.shared_with_contact {
            check_text("shared_with_contact", contact, MAX_CONTACT_LEN)?;
        }
        if let Some(key) = &self.temporary_key {
            check_blob("temporary_key", key)?;
        }
        validate_window("access", self.access_start, self.access_end, MAX_STAY_MS)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPatch {
    pub access_start: Option<Ms>,
    pub access_end: Option<Ms>,
    pub shared_with_user_id: Option<Option<Ulid>>,
    pub shared_with_contact: Option<Option<String>>,
    pub temporary_key: Option<Option<Blob>>,
}

impl AccessPatch {
    pub fn moves_window(&self) -> bool {
        self.access_start.is_some() || self.access_end.is_some()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.moves_window()
            && self.shared_with_user_id.is_none()
            && self.shared_with_contact.is_none()
            && self.temporary_key.is_none()
        {
            return Err(EngineError::InvalidField { field: "patch", reason: "nothing to change" });
        }
        if let Some(Some(contact)) = &self.shared_with_contact {
            check_text("shared_with_contact", contact, MAX_CONTACT_LEN)?;
        }
        if let Some(Some(key)) = &self.temporary_key {
            check_blob("temporary_key", key)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, current: &GuestAccess) -> Result<GuestAccess, EngineError> {
        let start = self.access_start.unwrap_or(current.window.start);
        let end = self.access_end.unwrap_or(current.window.end);
        let mut next = current.clone();
        next.window = validate_window("access", start, end, MAX_STAY_MS)?;
        if let Some(user) = self.shared_with_user_id {
            next.shared_with_user_id = user;
        }
        if let Some(contact) = &self.shared_with_contact {
            next.shared_with_contact = contact.clone();
        }
        if let Some(key) = &self.temporary_key {
            next.temporary_key = key.clone();
        }
        if next.shared_with_user_id.is_none() && next.shared_with_contact.is_none() {
            return Err(EngineError::InvalidField {
                field: "shared_with",
                reason: "needs a user id or a contact",
            });
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarm {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub time: AlarmTime,
    pub days: Vec<Weekday>,
    pub label: Option<String>,
    pub music: Option<Music>,
    pub scenario: Option<String>,
    /// Both absent means "the whole stay".
    pub active_from: Option<Ms>,
    pub active_until: Option<Ms>,
}

fn check_alarm_fields(
    time: Option<&AlarmTime>,
    label: Option<&String>,
    music: Option<&Music>,
    scenario: Option<&String>,
) -> Result<(), EngineError> {
    if let Some(t) = time
        && !t.is_valid()
    {
        return Err(EngineError::InvalidField { field: "time", reason: "not a time of day" });
    }
    if let Some(l) = label {
        check_text("label", l, MAX_LABEL_LEN)?;
    }
    if let Some(uri) = music.and_then(|m| m.uri.as_ref()) {
        check_text("music_uri", uri, MAX_URI_LEN)?;
    }
    if let Some(s) = scenario {
        check_text("scenario", s, MAX_SCENARIO_NAME_LEN)?;
    }
    Ok(())
}

/// Sorted, deduplicated weekday set.
pub(crate) fn normalize_days(mut days: Vec<Weekday>) -> Vec<Weekday> {
    days.sort();
    days.dedup();
    days
}

impl NewAlarm {
    /// Returns the explicit effective window, or `None` to inherit the stay.
    pub fn validate(&self) -> Result<Option<Span>, EngineError> {
        check_alarm_fields(
            Some(&self.time),
            self.label.as_ref(),
            self.music.as_ref(),
            self.scenario.as_ref(),
        )?;
        match (self.active_from, self.active_until) {
            (None, None) => Ok(None),
            (Some(from), Some(until)) => {
                validate_window("alarm window", from, until, MAX_STAY_MS).map(Some)
            }
            _ => Err(EngineError::InvalidField {
                field: "alarm window",
                reason: "active_from and active_until go together",
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmPatch {
    pub time: Option<AlarmTime>,
    pub days: Option<Vec<Weekday>>,
    pub label: Option<Option<String>>,
    pub music: Option<Option<Music>>,
    pub scenario: Option<Option<String>>,
    pub active_from: Option<Ms>,
    pub active_until: Option<Ms>,
}

impl AlarmPatch {
    pub fn moves_window(&self) -> bool {
        self.active_from.is_some() || self.active_until.is_some()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.moves_window()
            && self.time.is_none()
            && self.days.is_none()
            && self.label.is_none()
            && self.music.is_none()
            && self.scenario.is_none()
        {
            return Err(EngineError::InvalidField { field: "patch", reason: "nothing to change" });
        }
        check_alarm_fields(
            self.time.as_ref(),
            self.label.as_ref().and_then(Option::as_ref),
            self.music.as_ref().and_then(Option::as_ref),
            self.scenario.as_ref().and_then(Option::as_ref),
        )
    }

    pub fn apply_to(&self, current: &Alarm) -> Result<Alarm, EngineError> {
        let from = self.active_from.unwrap_or(current.window.start);
        let until = self.active_until.unwrap_or(current.window.end);
        let mut next = current.clone();
        next.window = validate_window("alarm window", from, until, MAX_STAY_MS)?;
        if let Some(time) = self.time {
            next.time = time;
        }
        if let Some(days) = &self.days {
            next.days = normalize_days(days.clone());
        }
        if let Some(label) = &self.label {
            next.label = label.clone();
        }
        if let Some(music) = &self.music {
            next.music = music.clone();
        }
        if let Some(scenario) = &self.scenario {
            next.scenario = scenario.clone();
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Ms = 1_767_225_600_000; // 2026-01-01
    const DAY: Ms = 86_400_000;

    fn new_booking(check_in: Ms, check_out: Ms) -> NewBooking {
        NewBooking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            check_in,
            check_out,
            total_price: 12_000,
            special_requests: None,
        }
    }

    #[test]
    fn booking_request_rejects_reversed_stay() {
        assert!(matches!(
            new_booking(T0 + DAY, T0).validate(),
            Err(EngineError::InvalidField { field: "stay", .. })
        ));
        assert_eq!(new_booking(T0, T0 + DAY).validate().unwrap(), Span::new(T0, T0 + DAY));
    }

    #[test]
    fn booking_request_bounds_note() {
        let mut req = new_booking(T0, T0 + DAY);
        req.special_requests = Some("x".repeat(MAX_SPECIAL_REQUESTS_LEN + 1));
        assert!(matches!(req.validate(), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn booking_patch_revalidates_merged_stay() {
        let current = Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_id: Ulid::new(),
            stay: Span::new(T0, T0 + 2 * DAY),
            status: BookingStatus::Confirmed,
            total_price: 100,
            special_requests: Some("late arrival".into()),
            created_at: T0,
        };
        let bad = BookingPatch { check_in: Some(T0 + 3 * DAY), ..Default::default() };
        assert!(bad.validate().is_ok());
        assert!(matches!(bad.apply_to(&current), Err(EngineError::InvalidField { .. })));

        let good = BookingPatch {
            check_out: Some(T0 + 3 * DAY),
            special_requests: Some(None),
            ..Default::default()
        };
        let next = good.apply_to(&current).unwrap();
        assert_eq!(next.stay, Span::new(T0, T0 + 3 * DAY));
        assert_eq!(next.special_requests, None);
        assert_eq!(next.total_price, 100);
    }

    #[test]
    fn empty_patches_are_rejected() {
        assert!(BookingPatch::default().validate().is_err());
        assert!(AccessPatch::default().validate().is_err());
        assert!(AlarmPatch::default().validate().is_err());
    }

    #[test]
    fn access_request_needs_a_recipient() {
        let mut req = NewGuestAccess {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            access_start: T0,
            access_end: T0 + DAY,
            shared_with_user_id: None,
            shared_with_contact: None,
            temporary_key: None,
        };
        assert!(matches!(
            req.validate(),
            Err(EngineError::InvalidField { field: "shared_with", .. })
        ));
        req.shared_with_contact = Some("guest@example.com".into());
        assert!(req.validate().is_ok());
        req.shared_with_contact = Some("   ".into());
        assert!(req.validate().is_err());
    }

    #[test]
    fn alarm_request_checks_time_and_window_pairing() {
        let mut req = NewAlarm {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            time: AlarmTime { hour: 7, minute: 30 },
            days: vec![],
            label: None,
            music: None,
            scenario: None,
            active_from: None,
            active_until: None,
        };
        assert_eq!(req.validate().unwrap(), None);

        req.active_from = Some(T0);
        assert!(req.validate().is_err());
        req.active_until = Some(T0 + DAY);
        assert_eq!(req.validate().unwrap(), Some(Span::new(T0, T0 + DAY)));

        req.time = AlarmTime { hour: 24, minute: 0 };
        assert!(matches!(req.validate(), Err(EngineError::InvalidField { field: "time", .. })));
    }

    #[test]
    fn days_are_normalized() {
        let days = normalize_days(vec![Weekday::Fri, Weekday::Mon, Weekday::Fri]);
        assert_eq!(days, vec![Weekday::Mon, Weekday::Fri]);
    }
}
