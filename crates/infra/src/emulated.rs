//! In-memory control backend
//!
//! Behaves like a driver: named controls with numids, typed values, range
//! clamping and change reporting. Profiles build one of these; tests build
//! ad-hoc devices directly.

use tracing::trace;

use carmine_core::{ControlIo, DeviceIdentity, ElemPayload, HwElemDesc, HwError, HwResult};

struct EmuElem {
    numid: u32,
    name: String,
    writable: bool,
    payload: ElemPayload,
}

pub struct EmulatedDevice {
    identity: DeviceIdentity,
    elems: Vec<EmuElem>,
    monitor_targets: Vec<usize>,
}

impl EmulatedDevice {
    pub fn new(serial: &str, model: &str) -> Self {
        EmulatedDevice {
            identity: DeviceIdentity {
                serial: serial.to_string(),
                model: model.to_string(),
            },
            elems: Vec::new(),
            monitor_targets: Vec::new(),
        }
    }

    fn add(&mut self, name: &str, writable: bool, payload: ElemPayload) {
        let numid = self.elems.len() as u32 + 1;
        self.elems.push(EmuElem {
            numid,
            name: name.to_string(),
            writable,
            payload,
        });
    }

    pub fn add_bool(&mut self, name: &str, value: bool) {
        self.add(name, true, ElemPayload::Boolean { value });
    }

    pub fn add_enum(&mut self, name: &str, value: u32, items: &[&str]) {
        self.add(
            name,
            true,
            ElemPayload::Enumerated {
                value,
                items: items.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn add_int(&mut self, name: &str, value: i64, min: i64, max: i64) {
        self.add(name, true, ElemPayload::Integer { value, min, max });
    }

    pub fn add_bytes(&mut self, name: &str, capacity: usize) {
        self.add(name, true, ElemPayload::bytes_with_capacity(capacity));
    }

    pub fn set_monitor_targets(&mut self, targets: Vec<usize>) {
        self.monitor_targets = targets;
    }

    fn elem_mut(&mut self, numid: u32) -> HwResult<&mut EmuElem> {
        self.elems
            .iter_mut()
            .find(|e| e.numid == numid)
            .ok_or(HwError::NoSuchControl(numid))
    }

    fn elem(&self, numid: u32) -> HwResult<&EmuElem> {
        self.elems
            .iter()
            .find(|e| e.numid == numid)
            .ok_or(HwError::NoSuchControl(numid))
    }
}

impl ControlIo for EmulatedDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn enumerate(&mut self) -> HwResult<Vec<HwElemDesc>> {
        Ok(self
            .elems
            .iter()
            .map(|e| HwElemDesc {
                numid: e.numid,
                name: e.name.clone(),
                writable: e.writable,
                payload: e.payload.clone(),
            })
            .collect())
    }

    fn read(&mut self, numid: u32) -> HwResult<i64> {
        Ok(self.elem(numid)?.payload.int_value())
    }

    fn write(&mut self, numid: u32, value: i64) -> HwResult<bool> {
        let e = self.elem_mut(numid)?;
        if !e.writable {
            return Err(HwError::NotWritable(numid));
        }
        let changed = e.payload.set_int(value);
        trace!(name = %e.name, value, changed, "emulated write");
        Ok(changed)
    }

    fn read_bytes(&mut self, numid: u32) -> HwResult<Vec<u8>> {
        Ok(self.elem(numid)?.payload.bytes().to_vec())
    }

    fn write_bytes(&mut self, numid: u32, data: &[u8]) -> HwResult<bool> {
        let e = self.elem_mut(numid)?;
        if !e.writable {
            return Err(HwError::NotWritable(numid));
        }
        Ok(e.payload.set_bytes(data))
    }

    fn monitor_source_targets(&self) -> Vec<usize> {
        self.monitor_targets.clone()
    }
}
