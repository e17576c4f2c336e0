use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    device::{DeviceLink, device_url},
    messages::Notification,
    notify::{NotificationSink, deliver},
    render::{Marker, MarkerKind, MarkerRenderer},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotateError {
    #[error("Hey, wait my friend. Rotation is in progress!")]
    InProgress,

    #[error("That is an invalid command. Range must be in 0° - 359°")]
    OutOfRange(i64),
}

/// Rotator position as reported by the controller box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Degrees(i32),
    Unknown,
}

impl Position {
    /// Shown to users when the position could not be read.
    pub const UNKNOWN_SENTINEL: i32 = 1000;

    /// Parses a `/rotatorcontrol/get` reply; the angle is the fourth
    /// pipe-separated field.
    pub fn parse(reply: &str) -> Position {
        reply
            .split('|')
            .nth(3)
            .and_then(|field| field.parse::<i32>().ok())
            .map_or(Position::Unknown, Position::Degrees)
    }

    pub fn degrees(self) -> i32 {
        match self {
            Position::Degrees(degrees) => degrees,
            Position::Unknown => Position::UNKNOWN_SENTINEL,
        }
    }

    /// Angle usable for drawing, if the device reported a sane bearing.
    pub fn bearing(self) -> Option<u16> {
        match self {
            Position::Degrees(degrees) if (0..360).contains(&degrees) => Some(degrees as u16),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationRequest {
    target: u16,
}

impl RotationRequest {
    pub fn new(target: i64) -> Result<Self, RotateError> {
        match u16::try_from(target) {
            Ok(target) if target < 360 => Ok(RotationRequest { target }),
            _ => Err(RotateError::OutOfRange(target)),
        }
    }

    pub fn target(self) -> u16 {
        self.target
    }
}

/// A rotator box and the locator map its markers are drawn on.
#[derive(Clone, Debug)]
pub struct Rotor {
    pub address: String,
    pub template: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationOutcome {
    Arrived,
    TimedOut,
}

enum RotationPhase {
    Moving { attempt: u32 },
    Arrived,
    TimedOut,
}

/// Holds the in-progress flag for the lifetime of one rotation task.
struct RotationGuard(Arc<AtomicBool>);

impl RotationGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RotationGuard(Arc::clone(flag)))
    }
}

impl Drop for RotationGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RotatorController {
    link: Arc<dyn DeviceLink>,
    sink: Arc<dyn NotificationSink>,
    renderer: Arc<dyn MarkerRenderer>,
    in_progress: Arc<AtomicBool>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl RotatorController {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        sink: Arc<dyn NotificationSink>,
        renderer: Arc<dyn MarkerRenderer>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        RotatorController {
            link,
            sink,
            renderer,
            in_progress: Arc::new(AtomicBool::new(false)),
            poll_interval,
            max_attempts,
        }
    }

    pub fn is_rotating(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn query_position(&self, address: &str) -> Position {
        if self
            .link
            .exchange(&device_url(address, "/rotatorcontrol/set/power/on"))
            .await
            .is_none()
        {
            warn!("Rotator {} power/on operation failed", address);
        }

        let Some(reply) = self
            .link
            .exchange(&device_url(address, "/rotatorcontrol/get"))
            .await
        else {
            warn!("Rotator {} get operation failed", address);
            return Position::Unknown;
        };

        let position = Position::parse(&reply);
        debug!("Rotator {} reported {:?} -> {:?}", address, reply, position);
        position
    }

    /// Replies with the rotator's current bearing.
    pub async fn status(&self, rotor: &Rotor, reply_to: Option<i64>) {
        let position = self.query_position(&rotor.address).await;
        let caption = format!("Rotator is currently at {}", position);
        let markers: Vec<Marker> = position
            .bearing()
            .map(|degrees| Marker {
                degrees,
                kind: MarkerKind::Current,
            })
            .into_iter()
            .collect();

        let notification = if markers.is_empty() {
            Notification::text(caption)
        } else {
            self.picture(&rotor.template, &markers, caption)
        };
        deliver(self.sink.as_ref(), notification.replying_to(reply_to)).await;
    }

    /// Starts a rotation towards `target` on a background task.
    ///
    /// Rejected without touching the device when the angle is out of range
    /// or another rotation is still being tracked.
    pub fn rotate(
        &self,
        rotor: &Rotor,
        target: i64,
        reply_to: Option<i64>,
    ) -> Result<JoinHandle<RotationOutcome>, RotateError> {
        let request = RotationRequest::new(target)?;
        let guard = RotationGuard::claim(&self.in_progress).ok_or(RotateError::InProgress)?;

        info!("Rotating {} to {}°", rotor.address, request.target());
        let controller = self.clone();
        let rotor = rotor.clone();
        Ok(tokio::spawn(async move {
            controller.track(guard, rotor, request, reply_to).await
        }))
    }

    async fn track(
        self,
        guard: RotationGuard,
        rotor: Rotor,
        request: RotationRequest,
        reply_to: Option<i64>,
    ) -> RotationOutcome {
        let target = request.target();
        self.announce(&rotor, target, reply_to).await;

        // The reply is irrelevant, arrival is detected by polling.
        let _ = self
            .link
            .exchange(&device_url(&rotor.address, &format!("/rotatorcontrol/set/{}", target)))
            .await;

        // The poll budget is wall-clock time, slow device replies count against it.
        let started = Instant::now();
        let deadline = started + self.poll_interval * self.max_attempts;
        let mut ticks = time::interval_at(started + self.poll_interval, self.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut phase = RotationPhase::Moving { attempt: 0 };
        let outcome = loop {
            phase = match phase {
                RotationPhase::Moving { attempt } => {
                    let poll = async {
                        ticks.tick().await;
                        self.query_position(&rotor.address).await
                    };
                    match time::timeout_at(deadline, poll).await {
                        Err(_) => RotationPhase::TimedOut,
                        Ok(position) if position == Position::Degrees(i32::from(target)) => {
                            RotationPhase::Arrived
                        }
                        Ok(position) => {
                            debug!(
                                "Rotator {} at {} heading for {}° (poll {})",
                                rotor.address,
                                position,
                                target,
                                attempt + 1
                            );
                            RotationPhase::Moving {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                RotationPhase::Arrived => break RotationOutcome::Arrived,
                RotationPhase::TimedOut => break RotationOutcome::TimedOut,
            };
        };

        let notification = match outcome {
            RotationOutcome::Arrived => {
                info!("Rotator {} arrived at {}°", rotor.address, target);
                self.picture(
                    &rotor.template,
                    &[Marker {
                        degrees: target,
                        kind: MarkerKind::Current,
                    }],
                    format!("Rotation done, we're now looking at {}°", target),
                )
            }
            RotationOutcome::TimedOut => {
                warn!("Rotator {} did not reach {}° in time", rotor.address, target);
                Notification::text(format!("Rotation timed out - status is {}°", target))
            }
        };
        deliver(self.sink.as_ref(), notification.replying_to(reply_to)).await;

        drop(guard);
        outcome
    }

    async fn announce(&self, rotor: &Rotor, target: u16, reply_to: Option<i64>) {
        let position = self.query_position(&rotor.address).await;
        let caption = format!("Please wait, rotating from {} to {}°", position, target);

        let notification = match position.bearing() {
            Some(current) => self.picture(
                &rotor.template,
                &[
                    Marker {
                        degrees: current,
                        kind: MarkerKind::Current,
                    },
                    Marker {
                        degrees: target,
                        kind: MarkerKind::Target,
                    },
                ],
                caption,
            ),
            None => Notification::text(caption),
        };
        deliver(self.sink.as_ref(), notification.replying_to(reply_to)).await;
    }

    fn picture(&self, template: &str, markers: &[Marker], caption: String) -> Notification {
        match self.renderer.render(template, markers) {
            Ok(jpeg) => Notification::image(jpeg, caption),
            Err(err) => {
                warn!("Could not render {}: {:?}", template, err);
                Notification::text(caption)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::NotificationBody,
        testing::{FakeLink, FakeRenderer, RecordingSink},
    };

    fn rotor() -> Rotor {
        Rotor {
            address: "rotor.local".to_string(),
            template: "locator_opti.png".to_string(),
        }
    }

    fn controller(link: &Arc<FakeLink>, sink: &Arc<RecordingSink>) -> RotatorController {
        RotatorController::new(
            link.clone(),
            sink.clone(),
            Arc::new(FakeRenderer),
            Duration::from_secs(2),
            90,
        )
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(Position::parse("X|Y|Z|287|W"), Position::Degrees(287));
        assert_eq!(Position::parse("1|0|OK|45"), Position::Degrees(45));
        assert_eq!(Position::parse("1|0|OK| 45 |x"), Position::Unknown);
        assert_eq!(Position::parse("bad"), Position::Unknown);
        assert_eq!(Position::parse("a|b|c|north|d"), Position::Unknown);
        assert_eq!(Position::parse(""), Position::Unknown);
    }

    #[test]
    fn test_position_bearing() {
        assert_eq!(Position::Degrees(359).bearing(), Some(359));
        assert_eq!(Position::Degrees(360).bearing(), None);
        assert_eq!(Position::Degrees(-1).bearing(), None);
        assert_eq!(Position::Unknown.bearing(), None);
        assert_eq!(Position::Unknown.to_string(), "1000°");
    }

    #[test]
    fn test_rotation_request_range() {
        assert_eq!(RotationRequest::new(0).map(|r| r.target()), Ok(0));
        assert_eq!(RotationRequest::new(359).map(|r| r.target()), Ok(359));
        assert_eq!(RotationRequest::new(360), Err(RotateError::OutOfRange(360)));
        assert_eq!(RotationRequest::new(-1), Err(RotateError::OutOfRange(-1)));
    }

    #[tokio::test]
    async fn test_query_position() {
        let link = Arc::new(FakeLink::new(&[Some("X|Y|Z|287|W")]));
        let sink = Arc::new(RecordingSink::default());
        let position = controller(&link, &sink).query_position("rotor.local").await;
        assert_eq!(position, Position::Degrees(287));
        assert_eq!(
            link.calls(),
            vec![
                "http://rotor.local/rotatorcontrol/set/power/on",
                "http://rotor.local/rotatorcontrol/get",
            ]
        );
    }

    #[tokio::test]
    async fn test_query_position_after_failed_power_on() {
        let link = Arc::new(
            FakeLink::new(&[Some("X|Y|Z|287|W")]).replying("/rotatorcontrol/set/power/on", None),
        );
        let sink = Arc::new(RecordingSink::default());
        let position = controller(&link, &sink).query_position("rotor.local").await;
        assert_eq!(position, Position::Degrees(287));
        assert_eq!(link.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_query_position_degrades_to_unknown() {
        let sink = Arc::new(RecordingSink::default());

        let link = Arc::new(FakeLink::new(&[Some("bad")]));
        assert_eq!(
            controller(&link, &sink).query_position("rotor.local").await,
            Position::Unknown
        );

        let link = Arc::new(FakeLink::new(&[None]));
        assert_eq!(
            controller(&link, &sink).query_position("rotor.local").await,
            Position::Unknown
        );
    }

    #[tokio::test]
    async fn test_out_of_range_is_rejected_before_device_call() {
        let link = Arc::new(FakeLink::new(&[Some("0|0|0|0|0")]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(&link, &sink);

        for target in [360, -1, 1000] {
            assert_eq!(
                controller.rotate(&rotor(), target, None).err(),
                Some(RotateError::OutOfRange(target))
            );
        }
        assert!(!controller.is_rotating());
        assert!(link.calls().is_empty());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_arrives() {
        let link = Arc::new(FakeLink::new(&[
            Some("0|0|0|10|0"),
            Some("0|0|0|10|0"),
            Some("0|0|0|30|0"),
            Some("0|0|0|60|0"),
            Some("0|0|0|90|0"),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(&link, &sink);

        let started = Instant::now();
        let handle = controller.rotate(&rotor(), 90, Some(7)).unwrap();
        assert!(controller.is_rotating());

        assert_eq!(handle.await.unwrap(), RotationOutcome::Arrived);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
        assert!(!controller.is_rotating());

        assert!(link.calls().contains(&"http://rotor.local/rotatorcontrol/set/90".to_string()));

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].caption(), "Please wait, rotating from 10° to 90°");
        assert_eq!(
            sent[0].body,
            NotificationBody::Image {
                bytes: vec![5, 45],
                caption: "Please wait, rotating from 10° to 90°".to_string(),
            }
        );
        assert_eq!(
            sent[1].body,
            NotificationBody::Image {
                bytes: vec![45],
                caption: "Rotation done, we're now looking at 90°".to_string(),
            }
        );
        assert!(sent.iter().all(|n| n.reply_to == Some(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_times_out_and_clears_flag() {
        let link = Arc::new(FakeLink::new(&[Some("0|0|0|10|0")]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(&link, &sink);

        let started = Instant::now();
        let handle = controller.rotate(&rotor(), 90, None).unwrap();
        assert_eq!(handle.await.unwrap(), RotationOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(180));
        assert!(!controller.is_rotating());

        let polls = link
            .calls()
            .iter()
            .filter(|url| url.ends_with("/rotatorcontrol/get"))
            .count();
        // One query for the announcement, then the poll budget.
        assert_eq!(polls, 1 + 90);

        let sent = sink.sent();
        assert_eq!(
            sent.last().unwrap().body,
            NotificationBody::Text("Rotation timed out - status is 90°".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_replies_count_against_poll_budget() {
        let link = Arc::new(FakeLink::new(&[Some("0|0|0|10|0")]).delayed(Duration::from_secs(5)));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(&link, &sink);

        let started = Instant::now();
        let handle = controller.rotate(&rotor(), 90, None).unwrap();
        assert_eq!(handle.await.unwrap(), RotationOutcome::TimedOut);

        // Announcement and move command take 15s, the 180s budget follows.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(195) && elapsed < Duration::from_secs(200));
        assert!(!controller.is_rotating());

        let sent = sink.sent();
        assert_eq!(
            sent.last().unwrap().body,
            NotificationBody::Text("Rotation timed out - status is 90°".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_rotation_is_rejected_while_in_progress() {
        let link = Arc::new(FakeLink::new(&[Some("0|0|0|10|0")]));
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(&link, &sink);

        let handle = controller.rotate(&rotor(), 90, None).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let calls_before = link.calls().len();

        assert_eq!(
            controller.rotate(&rotor(), 180, None).err(),
            Some(RotateError::InProgress)
        );
        assert!(controller.is_rotating());
        assert_eq!(link.calls().len(), calls_before);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!controller.is_rotating());
        assert!(
            !link
                .calls()
                .contains(&"http://rotor.local/rotatorcontrol/set/180".to_string())
        );

        // Flag released, a new rotation may start.
        assert!(controller.rotate(&rotor(), 180, None).is_ok());
    }

    #[tokio::test]
    async fn test_status() {
        let link = Arc::new(FakeLink::new(&[Some("0|0|0|270|0")]));
        let sink = Arc::new(RecordingSink::default());
        controller(&link, &sink).status(&rotor(), Some(3)).await;

        let link = Arc::new(FakeLink::new(&[None]));
        controller(&link, &sink).status(&rotor(), Some(4)).await;

        let sent = sink.sent();
        assert_eq!(
            sent[0],
            Notification::image(vec![135], "Rotator is currently at 270°").replying_to(Some(3))
        );
        assert_eq!(
            sent[1],
            Notification::text("Rotator is currently at 1000°").replying_to(Some(4))
        );
    }
}
