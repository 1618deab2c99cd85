use uuid::Uuid;

/**
 * How long (milliseconds) a connection attempt may take before it is cancelled and reported as
 * failed.
 */
pub const CONNECT_TIMEOUT: u64 = 5000;

/**
 * Maximum interval (milliseconds) between two advertisement packets of the accessory. If no
 * advertisement is received within this interval, the accessory is assumed to be out of range.
 */
pub const MAX_ADVERTISING_INTERVAL: u64 = 5000;

/**
 * How long (milliseconds) to wait for the acknowledgement of a matrix write before the next
 * queued matrix is written anyway.
 */
pub const WRITE_RESPONSE_TIMEOUT: u64 = 500;

/**
 * How long (seconds) a matrix is displayed if the caller does not specify an interval.
 */
pub const DEFAULT_MATRIX_DISPLAY_INTERVAL: f64 = 2.0;

/**
 * The local name the accessory advertises.
 */
pub const ACCESSORY_NAME: &str = "Nuimo";

pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
pub const BATTERY_CHARACTERISTIC: &str = "00002a19-0000-1000-8000-00805f9b34fb";
pub const DEVICE_INFORMATION_SERVICE: &str = "0000180a-0000-1000-8000-00805f9b34fb";
pub const FIRMWARE_VERSION_CHARACTERISTIC: &str = "00002a26-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the service hosting the LED matrix characteristic.
 */
pub const LED_MATRIX_SERVICE: &str = "f29b1523-cb19-40f3-be5c-7241ecb82fd1";

/**
 * The UUID of the characteristic that LED matrix commands are written to.
 */
pub const LED_MATRIX_CHARACTERISTIC: &str = "f29b1524-cb19-40f3-be5c-7241ecb82fd1";

pub const SENSOR_SERVICE: &str = "f29b1525-cb19-40f3-be5c-7241ecb82fd2";
pub const SENSOR_FLY_CHARACTERISTIC: &str = "f29b1526-cb19-40f3-be5c-7241ecb82fd2";
pub const SENSOR_TOUCH_CHARACTERISTIC: &str = "f29b1527-cb19-40f3-be5c-7241ecb82fd2";
pub const SENSOR_ROTATION_CHARACTERISTIC: &str = "f29b1528-cb19-40f3-be5c-7241ecb82fd2";
pub const SENSOR_BUTTON_CHARACTERISTIC: &str = "f29b1529-cb19-40f3-be5c-7241ecb82fd2";

// The constants above are all valid literals, parsing them can not fail
fn make_uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap()
}

pub fn make_battery_service_uuid() -> Uuid { make_uuid(BATTERY_SERVICE) }
pub fn make_battery_uuid() -> Uuid { make_uuid(BATTERY_CHARACTERISTIC) }
pub fn make_device_information_service_uuid() -> Uuid { make_uuid(DEVICE_INFORMATION_SERVICE) }
pub fn make_firmware_version_uuid() -> Uuid { make_uuid(FIRMWARE_VERSION_CHARACTERISTIC) }
pub fn make_led_matrix_service_uuid() -> Uuid { make_uuid(LED_MATRIX_SERVICE) }
pub fn make_led_matrix_uuid() -> Uuid { make_uuid(LED_MATRIX_CHARACTERISTIC) }
pub fn make_sensor_service_uuid() -> Uuid { make_uuid(SENSOR_SERVICE) }
pub fn make_sensor_fly_uuid() -> Uuid { make_uuid(SENSOR_FLY_CHARACTERISTIC) }
pub fn make_sensor_touch_uuid() -> Uuid { make_uuid(SENSOR_TOUCH_CHARACTERISTIC) }
pub fn make_sensor_rotation_uuid() -> Uuid { make_uuid(SENSOR_ROTATION_CHARACTERISTIC) }
pub fn make_sensor_button_uuid() -> Uuid { make_uuid(SENSOR_BUTTON_CHARACTERISTIC) }

/**
 * The services the accessory advertises; used as the scan filter.
 */
pub fn accessory_service_uuids() -> Vec<Uuid> {
    vec![
        make_battery_service_uuid(),
        make_device_information_service_uuid(),
        make_led_matrix_service_uuid(),
        make_sensor_service_uuid(),
    ]
}
