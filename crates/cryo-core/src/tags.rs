use crate::telemetry::ChannelKey;

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub device: &'static str,
    pub channel: &'static str,
    pub metric: &'static str,
}

impl Tag {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.device, self.channel)
    }
}

pub const SAMPLE_TEMP_K: Tag = Tag {
    device: "LakeShore350",
    channel: "Sensor_1_K",
    metric: "cryoseq_sample_temperature_kelvin",
};

pub const SAMPLE_SETPOINT_K: Tag = Tag {
    device: "LakeShore350",
    channel: "setpoint_K",
    metric: "cryoseq_sample_setpoint_kelvin",
};

pub const VTI_TEMP_K: Tag = Tag {
    device: "ITC",
    channel: "Sensor_1_K",
    metric: "cryoseq_vti_temperature_kelvin",
};

pub const VTI_SETPOINT_K: Tag = Tag {
    device: "ITC",
    channel: "setpoint_K",
    metric: "cryoseq_vti_setpoint_kelvin",
};

pub const MAGNET_FIELD_T: Tag = Tag {
    device: "IPS",
    channel: "field_T",
    metric: "cryoseq_magnet_field_tesla",
};

pub const SOURCE_CURRENT_A: Tag = Tag {
    device: "Keithley6221",
    channel: "current_A",
    metric: "cryoseq_source_current_ampere",
};

pub const SAMPLE_VOLTAGE_V: Tag = Tag {
    device: "Keithley2182",
    channel: "voltage_V",
    metric: "cryoseq_sample_voltage_volt",
};

pub const SAMPLE_RESISTANCE_OHM: Tag = Tag {
    device: "measurement",
    channel: "R_mean_Ohm",
    metric: "cryoseq_sample_resistance_ohm",
};
