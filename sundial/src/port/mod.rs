//! A single PTP port: its datasets, timers, and the nine-state protocol
//! state machine.

pub mod state;

use rand::Rng;

use crate::bmc::bmca::BestAnnounce;
use crate::bmc::foreign_master::ForeignMasterList;
use crate::clock::Clock;
use crate::config::PortConfig;
use crate::datastructures::common::{ClockIdentity, PortIdentity};
use crate::datastructures::datasets::{DelayMechanism, PortDS};
use crate::datastructures::messages::{
    AnnounceMessage, DelayRespMessage, Header, Message, MessageBody, MessageType, SyncMessage,
    MAX_DATA_LEN,
};
use crate::network::PacketInterface;
use crate::ptp_instance::PtpInstanceState;
use crate::servo::PiServo;
use crate::time::{Interval, Timestamp};
use state::PortState;

/// The send deadlines and the announce receipt deadline of a port. `None`
/// means the timer is stopped; every timer stops on a state transition.
#[derive(Debug, Clone, Copy, Default)]
struct Timers {
    announce: Option<Timestamp>,
    sync: Option<Timestamp>,
    delay_req: Option<Timestamp>,
    announce_receipt: Option<Timestamp>,
}

impl Timers {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A received two-step sync waiting for its follow-up.
#[derive(Debug, Clone, Copy)]
struct PendingSync {
    sequence_id: u16,
    correction_field: i64,
    recv_time: Timestamp,
}

/// A sent delay request whose send timestamp has been captured from the
/// loopback path.
#[derive(Debug, Clone, Copy)]
struct PendingDelayReq {
    sequence_id: u16,
    send_time: Timestamp,
}

/// One PTP port of the local clock.
pub struct Port<R> {
    port_ds: PortDS,
    config: PortConfig,
    rng: R,
    timers: Timers,
    state_updated: bool,
    announce_receipt_expired: bool,
    sync_seqid: u16,
    delay_req_seqid: u16,
    announce_seqid: u16,
    pending_sync: Option<PendingSync>,
    pending_delay_req: Option<PendingDelayReq>,
    current_master: ClockIdentity,
    foreign_masters: ForeignMasterList,
}

impl<R: Rng> Port<R> {
    pub(crate) fn new(config: PortConfig, port_identity: PortIdentity, rng: R) -> Self {
        Self {
            port_ds: PortDS::new(&config, port_identity),
            config,
            rng,
            timers: Timers::default(),
            state_updated: true,
            announce_receipt_expired: false,
            sync_seqid: 0,
            delay_req_seqid: 0,
            announce_seqid: 0,
            pending_sync: None,
            pending_delay_req: None,
            current_master: ClockIdentity::default(),
            foreign_masters: ForeignMasterList::new(port_identity),
        }
    }

    pub fn number(&self) -> u16 {
        self.port_ds.port_identity.port_number
    }

    pub fn state(&self) -> PortState {
        self.port_ds.port_state
    }

    pub(crate) fn announce_receipt_expired(&self) -> bool {
        self.announce_receipt_expired
    }

    fn transition(&mut self, new_state: PortState) {
        if self.port_ds.port_state != new_state {
            log::info!(
                "port {}: {} -> {}",
                self.number(),
                self.port_ds.port_state,
                new_state
            );
            self.port_ds.port_state = new_state;
            self.timers.clear();
            self.state_updated = true;
        }
    }

    /// Force the port back to the beginning of its lifecycle. Used when the
    /// clock stepped backwards and on reconfiguration.
    pub(crate) fn reinitialize(&mut self) {
        self.transition(PortState::Initializing);
        self.timers.clear();
        self.state_updated = true;
    }

    /// The master-clock-selected control event: one uncalibrated port gets
    /// promoted to slave.
    pub(crate) fn promote_to_slave(&mut self) -> bool {
        if self.state() == PortState::Uncalibrated {
            self.transition(PortState::Slave);
            true
        } else {
            false
        }
    }

    /// The asymmetry correction for the current master, in 2^-16 ns units.
    fn asymmetry_correction(&self) -> i64 {
        match self.config.delay_asymmetry_master {
            Some(master) if master != self.current_master => 0,
            _ => self.config.scaled_delay_asymmetry(),
        }
    }

    // --- announce receipt timeout ---

    fn restart_announce_receipt_timer(&mut self, current_time: Timestamp) {
        // up to one extra announce interval of jitter
        let multiplier = self.port_ds.announce_receipt_timeout as u32 + self.rng.gen_range(0..=1);
        let timeout = self
            .port_ds
            .log_announce_interval
            .as_timestamp()
            .mul_small(multiplier);

        self.timers.announce_receipt = Some(current_time + timeout);
        self.announce_receipt_expired = false;
    }

    fn stop_announce_receipt_timer(&mut self) {
        self.timers.announce_receipt = None;
    }

    pub(crate) fn check_announce_receipt_timeout(&mut self, current_time: Timestamp) {
        let Some(deadline) = self.timers.announce_receipt else {
            return;
        };
        if deadline > current_time {
            return;
        }

        match self.state() {
            PortState::Listening
            | PortState::Passive
            | PortState::Uncalibrated
            | PortState::Slave => {
                log::debug!("port {}: announce receipt timeout expired", self.number());
                // The best master selection acts on the expiry
                self.announce_receipt_expired = true;
                self.timers.announce_receipt = None;
            }
            state => {
                log::error!("announce receipt timer ran in state {state}");
                self.timers.announce_receipt = None;
            }
        }
    }

    // --- foreign master bookkeeping ---

    pub(crate) fn age_foreign_masters(&mut self, current_time: Timestamp) {
        self.foreign_masters
            .age(current_time, self.port_ds.announce_receipt_timeout);
    }

    /// The best foreign master seen on this port, unless the port is
    /// excluded from the selection.
    pub(crate) fn erbest(&self) -> Option<BestAnnounce> {
        if !self.state().selects_master() {
            return None;
        }
        self.foreign_masters
            .erbest()
            .map(BestAnnounce::from_foreign_master)
    }

    // --- decisions of the best master selection ---

    /// Move towards mastership, waiting out `qualification_intervals`
    /// announce intervals in PRE_MASTER first. Returns whether anything
    /// changed.
    pub(crate) fn bmc_update_master(
        &mut self,
        qualification_intervals: u32,
        current_time: Timestamp,
    ) -> bool {
        use PortState::*;

        match self.state() {
            Listening | Uncalibrated | Slave | Passive => {
                let timeout = self
                    .port_ds
                    .log_announce_interval
                    .as_timestamp()
                    .mul_small(qualification_intervals.max(1));

                self.transition(PreMaster);
                // the qualification deadline survives the transition
                self.timers.announce = Some(current_time + timeout);
                true
            }
            // Master stays master, PreMaster keeps waiting out its
            // qualification timer
            _ => false,
        }
    }

    pub(crate) fn bmc_update_passive(&mut self, master: ClockIdentity) -> bool {
        use PortState::*;

        if self.state() != Passive {
            // remember whose announces keep the receipt timer alive
            self.current_master = master;
        }

        match self.state() {
            Listening | Uncalibrated | Slave | PreMaster | Master => {
                self.transition(Passive);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn bmc_update_slave(&mut self, master: ClockIdentity) -> bool {
        use PortState::*;

        match self.state() {
            Slave => {
                if self.current_master == master {
                    false
                } else {
                    self.current_master = master;
                    self.transition(Uncalibrated);
                    true
                }
            }
            Listening | PreMaster | Master | Passive => {
                self.current_master = master;
                self.transition(Uncalibrated);
                true
            }
            Uncalibrated => {
                if self.current_master != master {
                    // new master candidate, no state change needed
                    self.current_master = master;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    // --- the state machine proper ---

    /// Run the state functions until the state settles, then report the
    /// earliest deadline at which this port wants to run again.
    pub(crate) fn run_state_machine<C: Clock, P: PacketInterface>(
        &mut self,
        global: &PtpInstanceState,
        clock: &mut C,
        packet: &mut P,
        current_time: Timestamp,
        io_ok: &mut bool,
    ) -> Timestamp {
        loop {
            let enter_state = self.state_updated;
            self.state_updated = false;

            match self.state() {
                PortState::Initializing => {
                    if enter_state {
                        self.stop_announce_receipt_timer();
                    }
                    self.port_ds.delay_mechanism = DelayMechanism::E2E;
                    self.transition(PortState::Listening);
                }
                PortState::Faulty | PortState::Disabled => {
                    if enter_state {
                        self.stop_announce_receipt_timer();
                    }
                }
                PortState::Listening => {
                    if enter_state {
                        self.restart_announce_receipt_timer(current_time);
                    }
                }
                PortState::PreMaster => {
                    if enter_state {
                        self.stop_announce_receipt_timer();
                    }
                    // qualification timeout
                    if let Some(deadline) = self.timers.announce {
                        if deadline <= current_time {
                            self.transition(PortState::Master);
                        }
                    }
                }
                PortState::Master => {
                    self.master_tick(global, clock, packet, current_time, enter_state, io_ok);
                }
                PortState::Passive => {
                    if enter_state {
                        self.restart_announce_receipt_timer(current_time);
                    }
                }
                PortState::Uncalibrated => {
                    if enter_state {
                        self.sync_seqid = 0;
                        self.delay_req_seqid = 0;
                        self.restart_announce_receipt_timer(current_time);
                    }
                    self.delay_req_tick(global, clock, packet, current_time, enter_state, io_ok);
                }
                PortState::Slave => {
                    if enter_state {
                        self.restart_announce_receipt_timer(current_time);
                    }
                    self.delay_req_tick(global, clock, packet, current_time, false, io_ok);
                }
            }

            if !self.state_updated {
                break;
            }
        }

        self.next_deadline(current_time)
    }

    fn master_tick<C: Clock, P: PacketInterface>(
        &mut self,
        global: &PtpInstanceState,
        clock: &mut C,
        packet: &mut P,
        current_time: Timestamp,
        enter_state: bool,
        io_ok: &mut bool,
    ) {
        if enter_state {
            self.sync_seqid = 0;
            self.delay_req_seqid = 0;
            self.stop_announce_receipt_timer();
        }

        if enter_state || self.timers.sync.map_or(true, |t| t <= current_time) {
            let message = Message::sync(
                global,
                &self.port_ds,
                self.config.unicast,
                self.sync_seqid,
                clock.now(),
            );
            if self.send(packet, &message, io_ok) {
                self.sync_seqid = self.sync_seqid.wrapping_add(1);
                self.timers.sync =
                    Some(current_time + self.port_ds.log_sync_interval.as_timestamp());
            }
        }

        if enter_state || self.timers.announce.map_or(true, |t| t <= current_time) {
            let message = Message::announce(
                global,
                &self.port_ds,
                self.config.unicast,
                self.announce_seqid,
                clock.now(),
                false,
            );
            if self.send(packet, &message, io_ok) {
                self.announce_seqid = self.announce_seqid.wrapping_add(1);
                self.timers.announce =
                    Some(current_time + self.port_ds.log_announce_interval.as_timestamp());
            }
        }
    }

    fn delay_req_tick<C: Clock, P: PacketInterface>(
        &mut self,
        global: &PtpInstanceState,
        clock: &mut C,
        packet: &mut P,
        current_time: Timestamp,
        enter_state: bool,
        io_ok: &mut bool,
    ) {
        if enter_state || self.timers.delay_req.map_or(true, |t| t <= current_time) {
            let message = Message::delay_req(
                global,
                &self.port_ds,
                self.config.unicast,
                self.delay_req_seqid,
                self.asymmetry_correction(),
                clock.now(),
            );
            if self.send(packet, &message, io_ok) {
                self.delay_req_seqid = self.delay_req_seqid.wrapping_add(1);

                // randomize the next request over [2^i, 2^(i+1)] seconds
                let interval = self.port_ds.log_min_delay_req_interval;
                let lower = interval.as_micros();
                let upper = Interval::from_log_2(interval.as_log_2().saturating_add(1)).as_micros();
                let wait = self.rng.gen_range(lower..=upper);

                self.timers.delay_req = Some(current_time + Timestamp::from_micros(wait));
            }
        }
    }

    fn next_deadline(&self, current_time: Timestamp) -> Timestamp {
        // nothing armed means nothing to do for a long while
        let mut deadline = current_time + Timestamp::from_secs(120);

        for timer in [
            self.timers.announce,
            self.timers.sync,
            self.timers.delay_req,
            self.timers.announce_receipt,
        ]
        .into_iter()
        .flatten()
        {
            if timer < deadline {
                deadline = timer;
            }
        }

        deadline
    }

    fn send<P: PacketInterface>(
        &mut self,
        packet: &mut P,
        message: &Message,
        io_ok: &mut bool,
    ) -> bool {
        let mut buffer = [0; MAX_DATA_LEN];
        let len = match message.serialize(&mut buffer) {
            Ok(len) => len,
            Err(error) => {
                log::error!("could not serialize message: {error}");
                return false;
            }
        };

        match packet.send(self.number(), message.is_event(), &buffer[..len]) {
            Ok(()) => true,
            Err(error) => {
                log::warn!("send failed on port {}: {error:?}", self.number());
                *io_ok = false;
                false
            }
        }
    }

    // --- receive dispatch ---

    pub(crate) fn handle_message<C: Clock, P: PacketInterface>(
        &mut self,
        global: &mut PtpInstanceState,
        servo: &mut PiServo,
        clock: &mut C,
        packet: &mut P,
        message: &Message,
        arrival: Timestamp,
        io_ok: &mut bool,
    ) {
        if message.header().domain_number != global.default_ds.domain_number {
            log::debug!("message from wrong domain");
            return;
        }

        if !self.state().receives_messages() {
            return;
        }

        match &message.body {
            MessageBody::Sync(sync) => {
                self.handle_sync(global, servo, clock, message.header(), sync, arrival)
            }
            MessageBody::FollowUp(follow_up) => self.handle_follow_up(
                global,
                servo,
                clock,
                message.header(),
                follow_up.precise_origin_timestamp.into(),
            ),
            MessageBody::DelayReq(_) => {
                self.handle_delay_req(global, packet, message.header(), arrival, io_ok)
            }
            MessageBody::DelayResp(delay_resp) => {
                self.handle_delay_resp(global, servo, message.header(), delay_resp)
            }
            MessageBody::Announce(announce) => self.handle_announce(global, announce, arrival),
            MessageBody::Ignored(message_type) => {
                log::trace!("ignoring {message_type:?} message");
            }
        }
    }

    fn handle_sync<C: Clock>(
        &mut self,
        global: &mut PtpInstanceState,
        servo: &mut PiServo,
        clock: &mut C,
        header: &Header,
        sync: &SyncMessage,
        arrival: Timestamp,
    ) {
        if !matches!(self.state(), PortState::Slave | PortState::Uncalibrated) {
            return;
        }
        if header.source_port_identity.clock_identity != self.current_master {
            return;
        }

        if !header.two_step_flag {
            let mut master_time = Timestamp::from(sync.origin_timestamp);
            master_time.add_correction(
                header.correction_field.as_scaled_nanos() + self.asymmetry_correction(),
            );
            servo.sync_received(clock, &mut global.current_ds, master_time, arrival);
        } else {
            // remember it for the matching follow-up
            self.pending_sync = Some(PendingSync {
                sequence_id: header.sequence_id,
                correction_field: header.correction_field.as_scaled_nanos(),
                recv_time: arrival,
            });
        }
    }

    fn handle_follow_up<C: Clock>(
        &mut self,
        global: &mut PtpInstanceState,
        servo: &mut PiServo,
        clock: &mut C,
        header: &Header,
        precise_origin: Timestamp,
    ) {
        if !matches!(self.state(), PortState::Slave | PortState::Uncalibrated) {
            return;
        }
        if header.source_port_identity.clock_identity != self.current_master {
            return;
        }

        let Some(pending) = self.pending_sync else {
            return;
        };
        if pending.sequence_id != header.sequence_id {
            log::warn!(
                "follow_up sequence id mismatch: {} {}",
                pending.sequence_id,
                header.sequence_id
            );
            return;
        }

        let mut master_time = precise_origin;
        master_time
            .add_correction(pending.correction_field + header.correction_field.as_scaled_nanos());
        servo.sync_received(clock, &mut global.current_ds, master_time, pending.recv_time);
    }

    fn handle_announce(
        &mut self,
        global: &PtpInstanceState,
        announce: &AnnounceMessage,
        arrival: Timestamp,
    ) {
        // announces advertising an alternate master are not accepted
        if announce.header.alternate_master_flag {
            return;
        }

        match self.state() {
            PortState::Uncalibrated | PortState::Slave => {
                if announce.header.source_port_identity == global.parent_ds.parent_port_identity {
                    self.restart_announce_receipt_timer(arrival);
                }
            }
            PortState::Passive => {
                if announce.header.source_port_identity.clock_identity == self.current_master {
                    self.restart_announce_receipt_timer(arrival);
                }
            }
            _ => {}
        }

        self.foreign_masters.register_announce_message(announce, arrival);
    }

    fn handle_delay_req<P: PacketInterface>(
        &mut self,
        global: &PtpInstanceState,
        packet: &mut P,
        request_header: &Header,
        arrival: Timestamp,
        io_ok: &mut bool,
    ) {
        if self.state() != PortState::Master {
            return;
        }

        let mut receive_time = arrival;
        receive_time.add_correction(self.asymmetry_correction());

        let response = Message::delay_resp(
            global,
            &self.port_ds,
            self.config.unicast,
            receive_time,
            request_header,
        );
        self.send(packet, &response, io_ok);
    }

    fn handle_delay_resp(
        &mut self,
        global: &mut PtpInstanceState,
        servo: &mut PiServo,
        header: &Header,
        delay_resp: &DelayRespMessage,
    ) {
        if !matches!(self.state(), PortState::Slave | PortState::Uncalibrated) {
            return;
        }
        if header.sequence_id != self.delay_req_seqid.wrapping_sub(1) {
            log::debug!(
                "delay_req sequence id mismatch: {} {}",
                self.delay_req_seqid.wrapping_sub(1),
                header.sequence_id
            );
            return;
        }
        if header.source_port_identity.clock_identity != self.current_master {
            return;
        }
        let Some(pending) = self.pending_delay_req else {
            // send completion has not come back yet
            return;
        };
        if pending.sequence_id != header.sequence_id {
            return;
        }

        let mut slave_send_time = pending.send_time;
        slave_send_time
            .add_correction(header.correction_field.as_scaled_nanos() - self.asymmetry_correction());

        servo.delay_received(
            &mut global.current_ds,
            slave_send_time,
            delay_resp.receive_timestamp.into(),
        );
    }

    /// Send completion of an event frame, synthesized from the multicast
    /// loopback path: a frame carrying our own clock identity came back.
    pub(crate) fn handle_frame_sent<P: PacketInterface>(
        &mut self,
        global: &PtpInstanceState,
        packet: &mut P,
        header: &Header,
        message_type: MessageType,
        sent_time: Timestamp,
        io_ok: &mut bool,
    ) {
        match message_type {
            MessageType::Sync => {
                if global.default_ds.two_step {
                    let follow_up = Message::follow_up(
                        global,
                        &self.port_ds,
                        self.config.unicast,
                        header.sequence_id,
                        sent_time,
                    );
                    self.send(packet, &follow_up, io_ok);
                }
            }
            MessageType::DelayReq => {
                self.pending_delay_req = Some(PendingDelayReq {
                    sequence_id: header.sequence_id,
                    send_time: sent_time,
                });
            }
            _ => {}
        }
    }
}
