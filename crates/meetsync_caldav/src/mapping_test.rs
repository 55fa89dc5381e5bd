#[cfg(test)]
mod tests {
    use crate::ics::*;
    use crate::mapping::*;
    use chrono::{Duration, TimeZone, Utc};
    use chrono_tz::Tz;
    use meetsync_common::models::*;

    const ACCOUNT: &str = "jane@icloud.com";

    fn details() -> MeetingDetails {
        let start = Utc.with_ymd_and_hms(2030, 5, 15, 8, 0, 0).unwrap();
        MeetingDetails {
            meeting_id: "7c1d2e3f-0a4b-4c5d-9e6f-8a7b6c5d4e3f".to_string(),
            title: "Design review".to_string(),
            description: Some("Agenda".to_string()),
            start,
            end: start + Duration::minutes(45),
            time_zone: "Europe/Berlin".to_string(),
            meeting_url: Some("https://meet.example.com/r/1".to_string()),
            participants: vec![
                ParticipantInfo {
                    email: Some(ACCOUNT.to_string()),
                    participant_type: ParticipantType::Scheduler,
                    ..Default::default()
                },
                ParticipantInfo {
                    name: Some("Guest".to_string()),
                    email: Some("guest@example.com".to_string()),
                    ..Default::default()
                },
            ],
            recurrence: vec![],
            reminders: vec![MeetingReminder::TenMinutes, MeetingReminder::OneHour],
            permissions: vec![],
            request_conference: false,
        }
    }

    fn parsed(body: &str) -> IcsEvent {
        let events = parse_events(body).unwrap();
        master_event(&events).unwrap().clone()
    }

    #[test]
    fn test_x_property_names() {
        assert_eq!(x_property_name("meetingId"), "X-MEETSYNC-MEETING-ID");
        assert_eq!(x_property_name("updatedBy"), "X-MEETSYNC-UPDATED-BY");
        assert_eq!(extension_key("X-MEETSYNC-OWNER-ACCOUNT").as_deref(), Some("ownerAccount"));
        assert_eq!(extension_key("x-meetsync-crm-id").as_deref(), Some("crmId"));
        assert_eq!(extension_key("X-APPLE-STRUCTURED-LOCATION"), None);
        assert_eq!(extension_key("X-MEETSYNC-"), None);
    }

    #[test]
    fn test_build_ics_writes_meeting() {
        let requested_at = Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap();
        let body = build_ics("0xowner", &details(), ACCOUNT, true, Some(requested_at), None).unwrap();
        let event = parsed(&body);

        assert_eq!(event.uid, "7c1d2e3f-0a4b-4c5d-9e6f-8a7b6c5d4e3f");
        assert_eq!(event.start.resolve(Tz::UTC), details().start);
        assert_eq!(event.end_instant(Tz::UTC), details().end);
        assert_eq!(event.location.as_deref(), Some("https://meet.example.com/r/1"));
        assert_eq!(event.sequence, Some(0));
        assert_eq!(event.organizer.as_ref().unwrap().email, ACCOUNT);

        let own = event.attendee(ACCOUNT).unwrap();
        assert_eq!(own.partstat.as_deref(), Some("ACCEPTED"));
        let guest = event.attendee("guest@example.com").unwrap();
        assert_eq!(guest.partstat.as_deref(), Some("NEEDS-ACTION"));
        assert_eq!(guest.name.as_deref(), Some("Guest"));

        let props = extension_map(&event);
        assert_eq!(props["meetingId"], "7c1d2e3f-0a4b-4c5d-9e6f-8a7b6c5d4e3f");
        assert_eq!(props["updatedBy"], "meetsync");
        assert_eq!(props["ownerAccount"], "0xowner");
        assert_eq!(props["meetingUrl"], "https://meet.example.com/r/1");
        assert_eq!(props["requestedAt"], requested_at.to_rfc3339());

        assert_eq!(body.matches("BEGIN:VALARM").count(), 2);
    }

    #[test]
    fn test_build_ics_without_participants() {
        let body = build_ics("0xowner", &details(), ACCOUNT, false, None, None).unwrap();
        let event = parsed(&body);
        assert!(event.attendees.is_empty());
        assert!(event.organizer.is_none());
    }

    #[test]
    fn test_build_ics_keeps_recurrence_lines() {
        let mut d = details();
        d.recurrence = vec![
            "RRULE:FREQ=WEEKLY;BYDAY=WE;COUNT=4".to_string(),
            "EXDATE:20300522T080000Z".to_string(),
        ];
        let event = parsed(&build_ics("0xowner", &d, ACCOUNT, false, None, None).unwrap());
        assert_eq!(event.rules.len(), 2);
        assert!(event.rules.iter().any(|r| r == "RRULE:FREQ=WEEKLY;BYDAY=WE;COUNT=4"));

        d.recurrence = vec!["FREQ=DAILY".to_string()];
        let event = parsed(&build_ics("0xowner", &d, ACCOUNT, false, None, None).unwrap());
        assert_eq!(event.rules, vec!["RRULE:FREQ=DAILY".to_string()]);

        d.recurrence = vec!["DTSTART:20300101T000000Z".to_string()];
        assert!(build_ics("0xowner", &d, ACCOUNT, false, None, None).is_err());
    }

    #[test]
    fn test_build_ics_carries_over_stored_state() {
        let mut stored_details = details();
        stored_details.meeting_url = None;
        let stored_body = build_ics("0xowner", &stored_details, ACCOUNT, true, None, None).unwrap();
        let stored_body = set_partstat(&stored_body, ACCOUNT, "TENTATIVE").unwrap().unwrap();
        let stored_body = set_partstat(&stored_body, "guest@example.com", "DECLINED")
            .unwrap()
            .unwrap();
        let stored_body = set_properties(
            &stored_body,
            &[
                ("LOCATION".to_string(), "Room 4".to_string()),
                ("X-MEETSYNC-CRM-ID".to_string(), "42".to_string()),
            ],
        )
        .unwrap();
        let current = parsed(&stored_body);

        let mut desired = details();
        desired.meeting_url = None;
        desired.title = "Design review v2".to_string();
        let event = parsed(&build_ics("0xowner", &desired, ACCOUNT, true, None, Some(&current)).unwrap());

        assert_eq!(event.summary.as_deref(), Some("Design review v2"));
        assert_eq!(event.sequence, Some(1));
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.attendee(ACCOUNT).unwrap().partstat.as_deref(), Some("TENTATIVE"));
        assert_eq!(
            event.attendee("guest@example.com").unwrap().partstat.as_deref(),
            Some("DECLINED")
        );
        assert_eq!(extension_map(&event)["crmId"], "42");
    }

    #[test]
    fn test_new_meeting_url_replaces_stored_location() {
        let mut stored_details = details();
        stored_details.meeting_url = Some("https://meet.example.com/r/old".to_string());
        let current = parsed(&build_ics("0xowner", &stored_details, ACCOUNT, true, None, None).unwrap());

        let event = parsed(&build_ics("0xowner", &details(), ACCOUNT, true, None, Some(&current)).unwrap());
        assert_eq!(event.location.as_deref(), Some("https://meet.example.com/r/1"));
    }

    #[test]
    fn test_to_unified_reads_meeting_and_status() {
        let body = build_ics("0xowner", &details(), ACCOUNT, true, None, None).unwrap();
        let declined = set_partstat(&body, ACCOUNT, "DECLINED").unwrap().unwrap();
        let event = parsed(&declined);

        let unified = to_unified(&event, "https://caldav.example.com/cal/", Some("Work"), ACCOUNT, Tz::UTC);
        assert_eq!(unified.id, details().meeting_id);
        assert_eq!(unified.provider_event_id, details().meeting_id);
        assert_eq!(unified.source, CalendarProvider::CalDav);
        assert_eq!(unified.status, EventStatus::Declined);
        assert_eq!(unified.calendar_name.as_deref(), Some("Work"));
        assert_eq!(unified.meeting_url.as_deref(), Some("https://meet.example.com/r/1"));
        assert!(unified.attendees.iter().any(|a| a.email == ACCOUNT && a.organizer));
        assert!(unified.recurrence.is_none());
    }

    #[test]
    fn test_to_busy_skips_free_declined_and_cancelled() {
        let body = build_ics("0xowner", &details(), ACCOUNT, true, None, None).unwrap();
        let event = parsed(&body);
        let busy = to_busy(&event, "cal", ACCOUNT, Tz::UTC).unwrap();
        assert_eq!(busy.source, TimeSlotSource::Webdav);
        assert_eq!(busy.end - busy.start, Duration::minutes(45));

        let mut transparent = event.clone();
        transparent.transparent = true;
        assert!(to_busy(&transparent, "cal", ACCOUNT, Tz::UTC).is_none());

        let mut cancelled = event.clone();
        cancelled.status = Some("CANCELLED".to_string());
        assert!(to_busy(&cancelled, "cal", ACCOUNT, Tz::UTC).is_none());

        let declined = parsed(&set_partstat(&body, ACCOUNT, "DECLINED").unwrap().unwrap());
        assert!(to_busy(&declined, "cal", ACCOUNT, Tz::UTC).is_none());
    }

    #[test]
    fn test_tombstone_is_cancelled() {
        let gone = tombstone("abc", "cal", ACCOUNT);
        assert_eq!(gone.status, EventStatus::Cancelled);
        assert_eq!(gone.start, chrono::DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(gone.provider_event_id, "abc");
    }

    #[test]
    fn test_partstat_round_trip() {
        for status in [
            ParticipationStatus::Accepted,
            ParticipationStatus::Declined,
            ParticipationStatus::Tentative,
            ParticipationStatus::NeedsAction,
        ] {
            assert_eq!(from_partstat(Some(to_partstat(status))), status);
        }
        assert_eq!(from_partstat(Some("delegated")), ParticipationStatus::NeedsAction);
    }
}
