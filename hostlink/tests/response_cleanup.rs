//! Every response variant releases exactly what it allocated.
//!
//! Runs in its own test binary because it installs a counting global
//! allocator. Counters are per thread so parallel tests do not interfere.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use bytes::Bytes;
use hostlink::slot::CommandPool;
use hostlink::{
    ApInfo, AuthMode, CommandCode, FailureStatus, MacAddress, ResponseEnvelope, SoftApConfig,
    WifiMode,
};

struct Counting;

thread_local! {
    static LIVE_BYTES: Cell<isize> = const { Cell::new(0) };
}

fn adjust(delta: isize) {
    let _ = LIVE_BYTES.try_with(|live| live.set(live.get() + delta));
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            adjust(layout.size() as isize);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        adjust(-(layout.size() as isize));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new = unsafe { System.realloc(ptr, layout, new_size) };
        if !new.is_null() {
            adjust(new_size as isize - layout.size() as isize);
        }
        new
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

fn net_allocation(f: impl FnOnce()) -> isize {
    let before = LIVE_BYTES.with(Cell::get);
    f();
    LIVE_BYTES.with(Cell::get) - before
}

const VARIANTS: usize = 9;

fn variant(index: usize) -> ResponseEnvelope {
    let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    match index {
        0 => ResponseEnvelope::GetMacAddress {
            mac: mac.to_string(),
        },
        1 => ResponseEnvelope::GetWifiMode {
            mode: WifiMode::Station,
        },
        2 => ResponseEnvelope::SetWifiMode {
            mode: WifiMode::StationSoftAp,
        },
        3 => ResponseEnvelope::GetApConfig {
            info: ApInfo {
                ssid: "lab".to_string(),
                bssid: mac,
                rssi: -60,
                channel: 11,
            },
            status: "success".to_string(),
        },
        4 => ResponseEnvelope::SetApConfig {
            status: "connect failed".to_string(),
        },
        5 => ResponseEnvelope::GetSoftApConfig(SoftApConfig {
            ssid: "hostlink".to_string(),
            password: "swordfish".to_string(),
            channel: 6,
            auth: AuthMode::Wpa2Psk,
            max_connections: 3,
            ssid_hidden: true,
        }),
        6 => ResponseEnvelope::SetSoftApConfig {
            status: "success".to_string(),
        },
        7 => ResponseEnvelope::DisconnectAp {
            status: "success".to_string(),
        },
        _ => ResponseEnvelope::failure(
            CommandCode::DisconnectAp.as_u8(),
            FailureStatus::InvalidState,
            "station is disconnected, cannot disconnect",
        ),
    }
}

fn round_trip(index: usize) {
    let response = variant(index);
    let wire = response.encode().unwrap();
    let decoded = ResponseEnvelope::decode(&wire).unwrap();
    assert!(decoded == response, "variant {index} changed on the wire");
}

#[test]
fn response_variants_release_their_allocations() {
    // Warm up lazily initialised statics before counting.
    for index in 0..VARIANTS {
        round_trip(index);
    }

    for index in 0..VARIANTS {
        let net = net_allocation(|| round_trip(index));
        assert_eq!(net, 0, "variant {index} leaked {net} bytes");
    }
}

#[test]
fn released_slot_frees_request_and_response() {
    let mut pool = CommandPool::new(2);
    let warm = pool
        .acquire(0, Bytes::from(vec![0u8; 16]))
        .unwrap();
    pool.release(warm);

    let net = net_allocation(|| {
        let slot = pool
            .acquire(0, Bytes::from(vec![0x00, 0x01, 0x00, 0x01]))
            .unwrap();
        pool.release(slot);
    });
    assert_eq!(net, 0);
    assert_eq!(pool.available(), 2);
}
