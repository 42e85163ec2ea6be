//! Radio test results
//!
//! RF test commands are answered by a single RF_TEST system event whose
//! first body byte repeats the test type. Only one test may be outstanding;
//! the expected type is recorded when the command is issued and cleared when
//! the matching event arrives.

use serde::{Deserialize, Serialize};

use crate::proto::RfTestType;
use crate::transport::Transport;
use crate::wire::WireReader;
use crate::{FmacError, Result};

/// RPU memory holding RF capture samples
pub const RF_TEST_CAP_BASE: u32 = 0x0030_0000;

/// Bytes per captured I/Q sample
pub const CAPTURE_SAMPLE_BYTES: usize = 3;

/// Decoded RF test result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfTestResult {
    /// ADC or packet capture, with the samples read back from RPU memory
    Capture {
        test: RfTestType,
        cap_len: u16,
        lna_gain: u8,
        bb_gain: u8,
        status: u8,
        data: Vec<u8>,
    },
    Temperature {
        temperature: i32,
        read_status: u32,
    },
    Rssi {
        lna_gain: u8,
        bb_gain: u8,
        agc_status: u8,
    },
    XoCalib {
        xo_val: u8,
    },
    XoTune {
        xo_value: u8,
    },
    /// Tests answered without a result body (TX tone, DPD, sleep)
    Acknowledged(RfTestType),
}

impl RfTestResult {
    /// Decode an RF test event body, starting at the test type byte
    ///
    /// `capture` holds the samples read back for capture tests.
    pub fn decode(rfevent: &[u8], capture: Vec<u8>) -> Result<Self> {
        let mut r = WireReader::new(rfevent);
        let test = RfTestType::from(r.read_u8()? as u32);

        let result = match test {
            RfTestType::RxAdcCap | RfTestType::RxStatPktCap | RfTestType::RxDynPktCap => {
                Self::Capture {
                    test,
                    cap_len: r.read_u16_le()?,
                    lna_gain: r.read_u8()?,
                    bb_gain: r.read_u8()?,
                    status: r.read_u8()?,
                    data: capture,
                }
            }
            RfTestType::GetTemperature => Self::Temperature {
                temperature: r.read_i32_le()?,
                read_status: r.read_u32_le()?,
            },
            RfTestType::RfRssi => Self::Rssi {
                lna_gain: r.read_u8()?,
                bb_gain: r.read_u8()?,
                agc_status: r.read_u8()?,
            },
            RfTestType::XoCalib => Self::XoCalib { xo_val: r.read_u8()? },
            RfTestType::XoTune => Self::XoTune { xo_value: r.read_u8()? },
            other => Self::Acknowledged(other),
        };
        Ok(result)
    }

    fn log(&self) {
        match self {
            Self::Capture { status, data, .. } => {
                log::info!("RF capture done, status {} ({} bytes)", status, data.len())
            }
            Self::Temperature { read_status, .. } if *read_status != 0 => {
                log::error!("Temperature reading failed")
            }
            Self::Temperature { temperature, .. } => {
                log::info!("The temperature is = {} degree celsius", temperature)
            }
            Self::Rssi { agc_status, .. } => log::info!("RF RSSI value is = {}", agc_status),
            Self::XoCalib { xo_val } => log::info!("XO value configured is = {}", xo_val),
            Self::XoTune { xo_value } => log::info!("Best XO value is = {}", xo_value),
            Self::Acknowledged(test) => log::debug!("RF test {:?} acknowledged", test),
        }
    }
}

/// Radio test scratch state kept on the device
#[derive(Debug, Clone)]
pub struct RadioTestState {
    expected: Option<RfTestType>,
    capture_len: usize,
    capture_base: u32,
    last_result: Option<RfTestResult>,
    radio_cmd_status: Option<u32>,
    radio_cmd_done: bool,
}

impl Default for RadioTestState {
    fn default() -> Self {
        Self {
            expected: None,
            capture_len: 0,
            capture_base: RF_TEST_CAP_BASE,
            last_result: None,
            radio_cmd_status: None,
            radio_cmd_done: false,
        }
    }
}

impl RadioTestState {
    /// Create new state reading captures from `capture_base`
    pub fn with_capture_base(capture_base: u32) -> Self {
        Self {
            capture_base,
            ..Self::default()
        }
    }

    /// Test type awaiting its result event
    pub fn expected(&self) -> Option<RfTestType> {
        self.expected
    }

    pub fn last_result(&self) -> Option<&RfTestResult> {
        self.last_result.as_ref()
    }

    /// Take the last result, leaving none stored
    pub fn take_result(&mut self) -> Option<RfTestResult> {
        self.last_result.take()
    }

    /// Status of the last radio command, once RADIOCMD_STATUS arrived
    pub fn radio_cmd_status(&self) -> Option<u32> {
        self.radio_cmd_status
    }

    pub fn radio_cmd_done(&self) -> bool {
        self.radio_cmd_done
    }

    pub(crate) fn expect(&mut self, test: RfTestType, capture_len: usize) {
        self.expected = Some(test);
        self.capture_len = capture_len;
        self.radio_cmd_done = false;
    }

    pub(crate) fn cancel(&mut self) {
        self.expected = None;
        self.capture_len = 0;
    }

    pub(crate) fn record_cmd_status(&mut self, status: u32) {
        self.radio_cmd_status = Some(status);
        self.radio_cmd_done = true;
    }

    /// Match an RF_TEST event against the outstanding test and decode it
    pub(crate) fn complete(
        &mut self,
        rfevent: &[u8],
        transport: &dyn Transport,
    ) -> Result<&RfTestResult> {
        let received = match rfevent.first() {
            Some(&test) => RfTestType::from(test as u32),
            None => {
                return Err(FmacError::MalformedMessage(
                    "RF test event without a test type".to_string(),
                ))
            }
        };

        if self.expected != Some(received) {
            log::error!(
                "Invalid event type ({:?}) recd for RF test type ({:?})",
                received,
                self.expected
            );
            return Err(FmacError::ProtocolMismatch {
                expected: format!("{:?}", self.expected),
                received: format!("{:?}", received),
            });
        }

        let capture_len = self.capture_len;
        self.cancel();

        let capture = if received.is_capture() && capture_len > 0 {
            transport.read_mem(self.capture_base, capture_len)?
        } else {
            Vec::new()
        };

        let result = RfTestResult::decode(rfevent, capture)?;
        result.log();
        let stored: &RfTestResult = self.last_result.insert(result);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingTransport;

    #[test]
    fn test_decode_temperature() {
        let mut body = vec![RfTestType::GetTemperature.code() as u8];
        body.extend_from_slice(&(-5i32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());

        assert_eq!(
            RfTestResult::decode(&body, Vec::new()).unwrap(),
            RfTestResult::Temperature {
                temperature: -5,
                read_status: 0
            }
        );
    }

    #[test]
    fn test_decode_truncated_rssi() {
        let body = [RfTestType::RfRssi.code() as u8, 1];
        assert!(matches!(
            RfTestResult::decode(&body, Vec::new()),
            Err(FmacError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_complete_requires_matching_type() {
        let transport = RecordingTransport::new();
        let mut state = RadioTestState::default();

        // Nothing outstanding
        let body = [RfTestType::XoTune.code() as u8, 0x42];
        assert!(matches!(
            state.complete(&body, &transport),
            Err(FmacError::ProtocolMismatch { .. })
        ));

        state.expect(RfTestType::XoCalib, 0);
        assert!(matches!(
            state.complete(&body, &transport),
            Err(FmacError::ProtocolMismatch { .. })
        ));
        // A mismatch keeps the outstanding request
        assert_eq!(state.expected(), Some(RfTestType::XoCalib));

        let body = [RfTestType::XoCalib.code() as u8, 0x21];
        let result = state.complete(&body, &transport).unwrap().clone();
        assert_eq!(result, RfTestResult::XoCalib { xo_val: 0x21 });
        assert_eq!(state.expected(), None);
        assert_eq!(state.take_result(), Some(result));
    }

    #[test]
    fn test_capture_reads_sample_memory() {
        let transport = RecordingTransport::new().with_memory(vec![0xAB; 9]);
        let mut state = RadioTestState::with_capture_base(0x1000);
        state.expect(RfTestType::RxAdcCap, 9);

        let body = [RfTestType::RxAdcCap.code() as u8, 3, 0, 2, 5, 0];
        let result = state.complete(&body, &transport).unwrap();

        match result {
            RfTestResult::Capture {
                cap_len,
                lna_gain,
                bb_gain,
                status,
                data,
                ..
            } => {
                assert_eq!(*cap_len, 3);
                assert_eq!((*lna_gain, *bb_gain, *status), (2, 5, 0));
                assert_eq!(data, &vec![0xAB; 9]);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(transport.mem_reads(), vec![(0x1000, 9)]);
    }

    #[test]
    fn test_radio_cmd_status() {
        let mut state = RadioTestState::default();
        state.expect(RfTestType::TxTone, 0);
        assert!(!state.radio_cmd_done());

        state.record_cmd_status(3);
        assert!(state.radio_cmd_done());
        assert_eq!(state.radio_cmd_status(), Some(3));
    }
}
