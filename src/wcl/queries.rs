//! GraphQL documents sent to the Warcraft Logs v2 client API.

/// Report title, master data and fight list with phase transitions.
pub const REPORT_OVERVIEW_QUERY: &str = r#"
query ReportOverview($code: String!) {
  reportData {
    report(code: $code) {
      title
      startTime
      endTime
      masterData {
        actors {
          id
          name
          type
          subType
          icon
          petOwner
          specs
        }
        abilities {
          gameID
          name
        }
      }
      fights {
        id
        name
        boss
        startTime
        endTime
        kill
        phaseTransitions {
          id
          startTime
        }
      }
    }
  }
}
"#;

/// One page of the report's event stream. `data` is a free-form list of
/// per-event maps; `nextPageTimestamp` drives pagination.
pub const EVENTS_PAGE_QUERY: &str = r#"
query ReportEvents($code: String!, $dataType: ReportDataType!, $startTime: Float!, $endTime: Float!, $limit: Int!, $abilityID: Float) {
  reportData {
    report(code: $code) {
      events(dataType: $dataType, startTime: $startTime, endTime: $endTime, limit: $limit, abilityID: $abilityID) {
        data
        nextPageTimestamp
      }
    }
  }
}
"#;
