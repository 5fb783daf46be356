/// Malaysian states and federal territories, as stored on records.
pub const STATES: [&str; 16] = [
    "JOHOR",
    "KEDAH",
    "KELANTAN",
    "MELAKA",
    "NEGERI SEMBILAN",
    "PAHANG",
    "PERAK",
    "PERLIS",
    "PULAU PINANG",
    "SABAH",
    "SARAWAK",
    "SELANGOR",
    "TERENGGANU",
    "KUALA LUMPUR",
    "LABUAN",
    "PUTRAJAYA",
];

const DISTRICTS: [(&str, &[&str]); 16] = [
    (
        "JOHOR",
        &[
            "Batu Pahat",
            "Johor Bahru",
            "Kluang",
            "Kota Tinggi",
            "Kulai",
            "Mersing",
            "Muar",
            "Pontian",
            "Segamat",
            "Tangkak",
        ],
    ),
    (
        "KEDAH",
        &[
            "Baling",
            "Bandar Baharu",
            "Kota Setar",
            "Kuala Muda",
            "Kubang Pasu",
            "Kulim",
            "Langkawi",
            "Padang Terap",
            "Pendang",
            "Pokok Sena",
            "Sik",
            "Yan",
        ],
    ),
    (
        "KELANTAN",
        &[
            "Bachok",
            "Gua Musang",
            "Jeli",
            "Kota Bharu",
            "Kuala Krai",
            "Machang",
            "Pasir Mas",
            "Pasir Puteh",
            "Tanah Merah",
            "Tumpat",
        ],
    ),
    (
        "MELAKA",
        &[
            "Alor Gajah",
            "Jasin",
            "Melaka Tengah",
        ],
    ),
    (
        "NEGERI SEMBILAN",
        &[
            "Jelebu",
            "Jempol",
            "Kuala Pilah",
            "Port Dickson",
            "Rembau",
            "Seremban",
            "Tampin",
        ],
    ),
    (
        "PAHANG",
        &[
            "Bera",
            "Bentong",
            "Cameron Highlands",
            "Jerantut",
            "Kuantan",
            "Lipis",
            "Maran",
            "Pekan",
            "Raub",
            "Rompin",
            "Temerloh",
        ],
    ),
    (
        "PERAK",
        &[
            "Bagan Datuk",
            "Batang Padang",
            "Hilir Perak",
            "Hulu Perak",
            "Kampar",
            "Kerian",
            "Kinta",
            "Kuala Kangsar",
            "Larut Matang dan Selama",
            "Manjung",
            "Muallim",
            "Perak Tengah",
        ],
    ),
    (
        "PERLIS",
        &[
            "Arau",
            "Kangar",
            "Kuala Perlis",
            "Padang Besar",
            "Kaki Bukit",
            "Simpang Empat",
        ],
    ),
    (
        "PULAU PINANG",
        &[
            "Barat Daya",
            "Seberang Perai Selatan",
            "Seberang Perai Tengah",
            "Seberang Perai Utara",
            "Timur Laut",
        ],
    ),
    (
        "SABAH",
        &[
            "Beaufort",
            "Beluran",
            "Kalabakan",
            "Keningau",
            "Kinabatangan",
            "Kota Belud",
            "Kota Kinabalu",
            "Kota Marudu",
            "Kuala Penyu",
            "Kudat",
            "Kunak",
            "Lahad Datu",
            "Membakut",
            "Nabawan",
            "Paitan",
            "Papar",
            "Penampang",
            "Pitas",
            "Putatan",
            "Ranau",
            "Sandakan",
            "Semporna",
            "Sipitang",
            "Sook",
            "Tambunan",
            "Tawau",
            "Telupid",
            "Tenom",
            "Tongod",
            "Tuaran",
        ],
    ),
    (
        "SARAWAK",
        &[
            "Asajaya",
            "Bau",
            "Belaga",
            "Beluru",
            "Betong",
            "Bintulu",
            "Bukit Mabong",
            "Dalat",
            "Daro",
            "Julau",
            "Kabong",
            "Kanowit",
            "Kapit",
            "Kuching",
            "Lawas",
            "Limbang",
            "Lubok Antu",
            "Lundu",
            "Marudi",
            "Matu",
            "Meradong",
            "Miri",
            "Mukah",
            "Pakan",
            "Pusa",
            "Samarahan",
            "Saratok",
            "Sarikei",
            "Sebauh",
            "Selangau",
            "Serian",
            "Sibu",
            "Simunjan",
            "Song",
            "Sri Aman",
            "Subis",
            "Tanjung Manis",
            "Tatau",
            "Tebedu",
            "Telang Usan",
        ],
    ),
    (
        "SELANGOR",
        &[
            "Gombak",
            "Hulu Langat",
            "Hulu Selangor",
            "Klang",
            "Kuala Langat",
            "Kuala Selangor",
            "Petaling",
            "Sabak Bernam",
            "Sepang",
        ],
    ),
    (
        "TERENGGANU",
        &[
            "Besut",
            "Dungun",
            "Hulu Terengganu",
            "Kemaman",
            "Kuala Nerus",
            "Kuala Terengganu",
            "Marang",
            "Setiu",
        ],
    ),
    (
        "KUALA LUMPUR",
        &[
            "Bandar Tun Razak",
            "Batu",
            "Bukit Bintang",
            "Cheras",
            "Kepong",
            "Lembah Pantai",
            "Segambut",
            "Seputeh",
            "Setiawangsa",
            "Titiwangsa",
            "Wangsa Maju",
        ],
    ),
    (
        "LABUAN",
        &[
            "Bandar Labuan (Victoria)",
            "Bebuloh",
            "Layang-Layangan",
            "Lubok Temiang",
            "Rancha-Rancha",
            "Pohon Batu",
        ],
    ),
    (
        "PUTRAJAYA",
        &[
            "Presint 1",
            "Presint 2",
            "Presint 3",
            "Presint 4",
            "Presint 5",
            "Presint 6",
            "Presint 7",
            "Presint 8",
            "Presint 9",
            "Presint 10",
            "Presint 11",
            "Presint 12",
            "Presint 13",
            "Presint 14",
            "Presint 15",
            "Presint 16",
            "Presint 17",
            "Presint 18",
            "Presint 19",
            "Presint 20",
        ],
    ),
];

/// Canonical state name for user input (case-insensitive).
pub fn normalize_state(input: &str) -> Option<&'static str> {
    let wanted = input.trim().to_uppercase();
    STATES.iter().copied().find(|s| *s == wanted)
}

/// Districts of a state, `None` for an unknown state.
pub fn districts(state: &str) -> Option<&'static [&'static str]> {
    DISTRICTS
        .iter()
        .find(|(name, _)| *name == state)
        .map(|(_, list)| *list)
}

/// Canonical district name within `state` (case-insensitive).
pub fn normalize_district(state: &str, input: &str) -> Option<&'static str> {
    let wanted = input.trim();
    districts(state)?
        .iter()
        .copied()
        .find(|d| d.eq_ignore_ascii_case(wanted))
}
